mod container;
mod strategy;
mod support;
