use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BatchResult, CoaddInfo, DownloadResult, ProgressEvent, ProgressSink, RemoveResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_info(info: &CoaddInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    pub fn print_list(files: &[String]) -> io::Result<()> {
        Self::print_json(&files)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_remove(result: &RemoveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_info(info: &CoaddInfo) -> io::Result<()> {
        let mut out = io::stdout().lock();
        let record = &info.record;
        writeln!(out, "key:         {}", record.key)?;
        writeln!(out, "tile:        {}", record.tile_name)?;
        writeln!(out, "band:        {}", record.band)?;
        writeln!(out, "attempt id:  {}", record.attempt_id)?;
        writeln!(out, "image_path:  {}", info.image_path())?;
        writeln!(out, "cat_path:    {}", info.cat_path())?;
        writeln!(out, "seg_path:    {}", info.seg_path())?;
        writeln!(out, "psf_path:    {}", info.psf_path())?;
        writeln!(out, "remote:      {}", info.paths.image.remote)?;
        if let Some(sources) = &info.src_info {
            writeln!(out, "sources:     {}", sources.len())?;
            for source in sources {
                writeln!(out, "  {}", source.filename)?;
                if let Some(head) = &source.head_path {
                    writeln!(out, "    head: {head}")?;
                }
            }
        }
        Ok(())
    }

    pub fn print_list(files: &[String]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for file in files {
            writeln!(out, "{file}")?;
        }
        Ok(())
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        println!(
            "downloaded {} ({} files, {} ms)",
            result.key, result.files, result.elapsed_ms
        );
        Ok(())
    }

    pub fn print_remove(result: &RemoveResult) -> io::Result<()> {
        println!("removed {} files for {}", result.removed.len(), result.key);
        Ok(())
    }

    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for item in &result.items {
            match &item.detail {
                Some(detail) => writeln!(out, "{} {} ({detail})", item.action, item.key)?,
                None => writeln!(out, "{} {}", item.action, item.key)?,
            }
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}
