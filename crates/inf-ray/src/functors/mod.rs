//! Built-in functors.

pub mod equal;
pub mod logic;
pub mod pick;
pub mod seen;
pub mod talks;
pub mod unique;
pub mod window;
