//! Demo units: minimal modules exercising endpoints and peer wiring.

mod hello_wide_world;
mod hello_world;

pub use hello_wide_world::HelloWideWorld;
pub use hello_world::HelloWorld;
