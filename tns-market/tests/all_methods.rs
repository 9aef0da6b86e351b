#![allow(unused_macros)]
use rstest_reuse::template;

// Runs a test once per price update rule

#[template]
#[rstest]
#[case::interpolation(tns_core::models::SolverMethod::Interpolation)]
#[case::subgradient(tns_core::models::SolverMethod::Subgradient)]
pub fn all_methods(#[case] method: tns_core::models::SolverMethod) -> () {}
