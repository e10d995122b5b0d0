pub mod mastered;
pub mod tags;
pub mod template;
pub mod value;
