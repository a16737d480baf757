pub mod alarm;
pub mod task;

pub use alarm::Alarm;
pub use task::{Annotation, Task, TimerRecovery, TitleEntry, TITLE_HISTORY_CAP};
