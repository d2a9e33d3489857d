use std::{
    fs::{create_dir_all, File},
    io::Write,
    path::PathBuf,
};

use burn::data::network::downloader;

use crate::error::{DenoiseError, Result};

/// Downloads a weights blob to `~/.cache/<module>-burn`, reusing a cached copy.
pub(crate) fn download(module: &'static str, url: &str) -> Result<PathBuf> {
    let model_dir = dirs::home_dir()
        .ok_or_else(|| DenoiseError::Configuration("no home directory for the weights cache".into()))?
        .join(".cache")
        .join(format!("{}-burn", module));

    if !model_dir.exists() {
        create_dir_all(&model_dir)?;
    }

    let file_base_name = url
        .rsplit_once('/')
        .map(|(_, name)| name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DenoiseError::Configuration(format!("no file name in url `{url}`")))?;
    let file_name = model_dir.join(file_base_name);
    if !file_name.exists() {
        tracing::info!("downloading {url}");
        let bytes = downloader::download_file_as_bytes(url, file_base_name);

        let mut output_file = File::create(&file_name)?;
        let bytes_written = output_file.write(&bytes)?;

        if bytes_written != bytes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Failed to write the whole weights file.",
            )
            .into());
        }
    }

    Ok(file_name)
}
