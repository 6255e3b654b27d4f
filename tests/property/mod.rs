//! Property-based tests for streaming and the tag protocol

mod line_buffering;
mod tag_parsing;
