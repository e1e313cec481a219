pub mod curves;
pub mod mask;
pub mod stack;

pub use curves::{save_curves_csv, write_curves_csv};
pub use mask::{load_mask, save_mask};
pub use stack::{write_stack, SampleType, StackHeader, StackReader, StackSample};
