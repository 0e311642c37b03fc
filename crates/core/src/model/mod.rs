mod ids;
mod module_progress;
mod navigation;
mod progress;
mod quiz;
mod step;

pub use ids::{ModuleId, ParseIdError, StepId, UserId};
pub use module_progress::ModuleProgressData;
pub use navigation::NavigationConfig;
pub use progress::{Position, Progress};
pub use quiz::QuizAnswer;
pub use step::{QuizAnswerUpdate, StepState, StepStatePatch};
