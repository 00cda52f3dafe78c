//! Default flow rates of Opentrons pipette models

/// Flow rates in uL/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRates {
    pub aspirate: f64,
    pub dispense: f64,
}

const fn rates(aspirate: f64, dispense: f64) -> FlowRates {
    FlowRates { aspirate, dispense }
}

/// Factory default flow rates for a pipette model name
pub fn default_flow_rates(pipette_name: &str) -> Option<FlowRates> {
    let flow_rates = match pipette_name {
        "p300_multi_gen2" => rates(94.0, 94.0),
        "p10_single" | "p10_multi" => rates(5.0, 10.0),
        "p300_single" | "p300_multi" => rates(150.0, 300.0),
        "p1000_single" => rates(500.0, 1000.0),
        "p20_single_gen2" => rates(3.78, 7.56),
        "p300_single_gen2" => rates(46.43, 92.86),
        "p1000_single_gen2" => rates(137.35, 274.7),
        "p20_multi_gen2" => rates(7.6, 7.6),
        _ => return None,
    };
    Some(flow_rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_pipettes() {
        assert_eq!(default_flow_rates("p20_single_gen2"), Some(rates(3.78, 7.56)));
        assert_eq!(default_flow_rates("p10_multi"), Some(rates(5.0, 10.0)));
        assert_eq!(default_flow_rates("p1000_single_gen2").unwrap().dispense, 274.7);
    }

    #[test]
    fn test_unknown_pipette() {
        assert_eq!(default_flow_rates("p50_single"), None);
    }
}
