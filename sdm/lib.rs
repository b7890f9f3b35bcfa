#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod artifact;
pub mod config;
pub mod evaluate;
pub mod features;
pub mod fetch;
pub mod folds;
pub mod glm;
pub mod pipeline;
pub mod project;
pub mod report;
pub mod sample;
pub mod select;

#[path = "../layers/mod.rs"]
pub mod layers;

#[path = "../occurrence/mod.rs"]
pub mod occurrence;
