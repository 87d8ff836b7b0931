pub mod controller;
pub mod observer;

pub use controller::{
    ControllerHandle, ControllerReport, SessionController, SessionControllerBuilder,
    TerminationReason,
};
pub use observer::{
    ChannelObserver, ObserverSet, SessionEvent, SessionEvents, SessionObserver, TracingObserver,
};
