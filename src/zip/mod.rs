mod body;
mod crc32;
mod deflate;
mod entry;
mod estimator;
mod extractor;
mod parser;
mod pathset;
mod streamer;
mod structures;
mod writer;

pub use body::EntryWriter;
pub use crc32::Crc32Accumulator;
pub use deflate::Deflater;
pub use entry::{Entry, EntryOptions, Member};
pub use estimator::SizeEstimator;
pub use extractor::{EntryReader, ZipExtractor};
pub use parser::ZipParser;
pub use pathset::PathSet;
pub use streamer::{Streamer, StreamerOptions};
pub use structures::*;
pub use writer::{RecordWriter, ZipWriter};
