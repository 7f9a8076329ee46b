pub mod subjects;

pub use subjects::resolve;
