use anyhow::anyhow;
use formatx::formatx;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub trait Output: Debug + Sync {
    type Writer: Write;

    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<Self::Writer>;

    /// Make everything written through the writer visible at the location, returning the path of
    /// the written file if there is one. Content from a writer that is dropped without being
    /// finished never appears.
    fn finish(&self, location_key: &str, writer: Self::Writer)
        -> anyhow::Result<Option<PathBuf>>;

    /// Remove content already finished at the location, if there is any.
    fn discard(&self, _location_key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether this output can be considered a no-op and therefore that any code that only writes to the output can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

impl<T: Output> Output for &T {
    type Writer = T::Writer;

    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<Self::Writer> {
        <T as Output>::writer_for_location_key(self, location_key)
    }

    fn finish(
        &self,
        location_key: &str,
        writer: Self::Writer,
    ) -> anyhow::Result<Option<PathBuf>> {
        <T as Output>::finish(self, location_key, writer)
    }

    fn discard(&self, location_key: &str) -> anyhow::Result<()> {
        <T as Output>::discard(self, location_key)
    }

    fn is_noop(&self) -> bool {
        <T as Output>::is_noop(self)
    }
}

/// Writes each location key to a file in a directory, naming the file by filling the key into a
/// template such as `"house_1__{}.csv"`.
#[derive(Debug)]
pub struct FileOutput {
    directory_path: PathBuf,
    file_template: String,
}

impl FileOutput {
    pub fn new(directory_path: PathBuf, file_template: String) -> Self {
        Self {
            directory_path,
            file_template,
        }
    }

    pub fn path_for_location_key(&self, location_key: &str) -> anyhow::Result<PathBuf> {
        let file_name = formatx!(&self.file_template, location_key)
            .map_err(|e| anyhow!("Bad output file template '{}': {e:?}", self.file_template))?;
        Ok(self.directory_path.join(file_name))
    }
}

/// A file being written under a temporary name next to its final path. It only takes its final
/// name once committed; otherwise it is removed when dropped.
#[derive(Debug)]
pub struct PendingFile {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PendingFile {
    fn create(final_path: PathBuf) -> anyhow::Result<Self> {
        let file_name = final_path
            .file_name()
            .ok_or_else(|| anyhow!("Output path {} has no file name", final_path.display()))?
            .to_string_lossy();
        let temp_path = final_path.with_file_name(format!(".{file_name}.partial"));
        let file = File::create(&temp_path)?;

        Ok(Self {
            temp_path,
            final_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("file has already been committed"))
    }

    fn commit(mut self) -> anyhow::Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| anyhow!("file has already been committed"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.temp_path, &self.final_path)?;

        Ok(self.final_path.clone())
    }
}

impl Write for PendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        // after a successful commit the temporary file no longer exists
        let _ = fs::remove_file(&self.temp_path);
    }
}

impl Output for FileOutput {
    type Writer = PendingFile;

    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<Self::Writer> {
        PendingFile::create(self.path_for_location_key(location_key)?)
    }

    fn finish(
        &self,
        _location_key: &str,
        writer: Self::Writer,
    ) -> anyhow::Result<Option<PathBuf>> {
        Ok(Some(writer.commit()?))
    }

    fn discard(&self, location_key: &str) -> anyhow::Result<()> {
        match fs::remove_file(self.path_for_location_key(location_key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// An output that goes to nowhere/ a "sink"/ /dev/null.
#[derive(Debug, Default)]
pub struct SinkOutput;

impl Output for SinkOutput {
    type Writer = io::Sink;

    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<Self::Writer> {
        Ok(io::sink())
    }

    fn finish(
        &self,
        _location_key: &str,
        _writer: Self::Writer,
    ) -> anyhow::Result<Option<PathBuf>> {
        Ok(None)
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Keeps finished content in memory, keyed by location key.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    contents: Mutex<IndexMap<String, Vec<u8>>>,
}

impl MemoryOutput {
    pub fn contents(&self, location_key: &str) -> Option<String> {
        self.contents
            .lock()
            .get(location_key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn location_keys(&self) -> Vec<String> {
        self.contents.lock().keys().cloned().collect()
    }
}

impl Output for MemoryOutput {
    type Writer = Vec<u8>;

    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<Self::Writer> {
        Ok(vec![])
    }

    fn finish(
        &self,
        location_key: &str,
        writer: Self::Writer,
    ) -> anyhow::Result<Option<PathBuf>> {
        self.contents.lock().insert(location_key.to_string(), writer);
        Ok(None)
    }

    fn discard(&self, location_key: &str) -> anyhow::Result<()> {
        self.contents.lock().shift_remove(location_key);
        Ok(())
    }
}
