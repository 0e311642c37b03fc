#![forbid(unsafe_code)]

pub mod access;
pub mod connectivity;
pub mod countdown;
pub mod course_services;
pub mod error;
pub mod navigation;
pub mod progress_store;
pub mod sync;

pub use course_core::Clock;

pub use access::ModuleAccess;
pub use connectivity::ConnectivityMonitor;
pub use countdown::WeekCountdown;
pub use course_services::{CourseServices, LearnerSession};
pub use error::{CourseServicesError, ObserverError, SessionError, SyncError};
pub use navigation::{
    Direction, NavigationAction, NavigationEngine, NavigationEvent, NavigationObserver,
    NavigationPhase,
};
pub use progress_store::ProgressStore;
pub use sync::SyncStatus;
