pub mod prometheusrule;

pub use prometheusrule::*;
