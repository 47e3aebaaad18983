// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Range query evaluation.
//!
//! An [`ast::Expr`] is planned once (matchers compiled, function resolved), then
//! [`evaluator::StepEvaluator`] walks the step grid, keeping one incremental
//! [`window::WindowBuffer`] per series, and assembles the result [`matrix::Matrix`].

pub mod ast;
pub mod cancel;
pub mod engine;
pub mod evaluator;
pub mod functions;
pub mod matcher;
pub mod matrix;
pub mod plan;
pub mod window;
