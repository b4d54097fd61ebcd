//! Append-only log of raw sensor samples.

use std::{
   fs::{self, File, OpenOptions},
   io::Write,
   path::{Path, PathBuf},
};

use log::info;

use crate::{
   error::{ChargeMonError, Result},
   sensors::sysfs::SampleLine,
};

/// Appends one line per full collection. The file is opened lazily on the
/// first write so a missing data directory does not prevent startup.
#[derive(Debug)]
pub struct SampleLog {
   path: PathBuf,
   file: Option<File>,
}

impl SampleLog {
   pub const fn new(path: PathBuf) -> Self {
      Self { path, file: None }
   }

   /// `~/.local/share/chargemon/samples.log`
   pub fn default_path() -> Result<PathBuf> {
      let base = dirs::data_local_dir().ok_or(ChargeMonError::DataDirNotFound)?;
      Ok(base.join("chargemon").join("samples.log"))
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn append(&mut self, line: &SampleLine) -> Result<()> {
      if self.file.is_none() {
         if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
         }
         info!("Starting sample log at {}", self.path.display());
         self.file = Some(
            OpenOptions::new()
               .create(true)
               .append(true)
               .open(&self.path)?,
         );
      }
      if let Some(file) = &mut self.file {
         writeln!(file, "{line}")?;
      }
      Ok(())
   }
}
