/// Input sources: a list of files (batch mode) or the engine's stream on fd 0.
use std::fs::File;
use std::io::{self, Read};
use std::mem::ManuallyDrop;
use std::os::fd::FromRawFd;
use std::path::{Path, PathBuf};

use log::debug;

/// Largest file read in batch mode.
pub const MAX_FILE: usize = 1024 * 1024;
/// Size of the reusable persistent-mode buffer.
pub const STREAM_BUFFER_SIZE: usize = 1_024_000;

/// Outcome of pulling the next input.
#[derive(Debug, PartialEq, Eq)]
pub enum Pull<'a> {
    Input(&'a [u8]),
    /// A whole batch file and where it came from.
    File(&'a Path, &'a [u8]),
    /// Nothing to run this iteration.
    Empty,
    /// No more inputs, ever.
    Exhausted,
}

/// Reads one file per pull, silently skipping those that cannot be read.
#[derive(Debug)]
pub struct BatchFiles {
    paths: std::vec::IntoIter<PathBuf>,
    buf: Vec<u8>,
    current: Option<PathBuf>,
}

impl BatchFiles {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into_iter(),
            buf: Vec::with_capacity(MAX_FILE),
            current: None,
        }
    }

    /// Read the next readable, non-empty file.
    pub fn next_file(&mut self) -> Option<(&Path, &[u8])> {
        self.current = None;
        for path in self.paths.by_ref() {
            self.buf.clear();
            let read = File::open(&path)
                .and_then(|file| file.take(MAX_FILE as u64).read_to_end(&mut self.buf));
            match read {
                Ok(0) => debug!("skipping empty input {}", path.display()),
                Ok(_) => {
                    self.current = Some(path);
                    break;
                }
                Err(err) => debug!("skipping unreadable input {}: {err}", path.display()),
            }
        }
        let path = self.current.as_deref()?;
        Some((path, &self.buf))
    }

    fn pull(&mut self) -> Pull<'_> {
        match self.next_file() {
            Some((path, data)) => Pull::File(path, data),
            None => Pull::Exhausted,
        }
    }
}

/// One read per pull from the engine-provided stream.
#[derive(Debug)]
pub struct StreamInput<R> {
    reader: R,
    buf: Box<[u8]>,
}

/// Unbuffered fd 0; buffering would leak bytes from one input into the next.
#[derive(Debug)]
pub struct Stdin(ManuallyDrop<File>);

impl Stdin {
    pub fn new() -> Self {
        // fd 0 belongs to the engine; we only ever borrow it.
        Self(ManuallyDrop::new(unsafe { File::from_raw_fd(libc::STDIN_FILENO) }))
    }
}

impl Default for Stdin {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for Stdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> StreamInput<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, STREAM_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    fn pull(&mut self) -> Pull<'_> {
        match self.reader.read(&mut self.buf) {
            Ok(0) => Pull::Empty,
            Ok(n) => Pull::Input(&self.buf[..n]),
            Err(err) => {
                if err.kind() != io::ErrorKind::Interrupted {
                    debug!("input stream read failed: {err}");
                }
                Pull::Empty
            }
        }
    }
}

/// The two input states. Chosen once at startup; there are no transitions.
#[derive(Debug)]
pub enum InputDispatcher<R = Stdin> {
    BatchIterating(BatchFiles),
    StreamReading(StreamInput<R>),
}

impl<R: Read> InputDispatcher<R> {
    pub fn next_input(&mut self) -> Pull<'_> {
        match self {
            InputDispatcher::BatchIterating(files) => files.pull(),
            InputDispatcher::StreamReading(stream) => stream.pull(),
        }
    }
}
