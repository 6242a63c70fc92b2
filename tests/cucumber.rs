//! Cucumber test runner for behavioural tests.
//!
//! Runs `BoshWorld` scenarios from `tests/features/bosh_session.feature`,
//! driving the engine on a virtual clock through `bosh_testing::Harness`.

mod steps;

use cucumber::World;
use world::BoshWorld;

#[tokio::main]
async fn main() { BoshWorld::run("tests/features/bosh_session.feature").await; }
