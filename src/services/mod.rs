pub mod nested_writer;

pub use nested_writer::NestedWriter;
