pub mod observer;
pub mod orchestrator;
pub mod state_machine;

pub use observer::{MetricsObserver, Observer, ObserverBus, TracingObserver};
pub use orchestrator::Orchestrator;
pub use state_machine::{is_terminal, transition};
