//! OCR engine that drives the `tesseract` executable.
//!
//! The decoded image is re-encoded as grayscale PNG and piped to `tesseract stdin stdout tsv`;
//! text and mean word confidence are rebuilt from the TSV rows.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::capability::{OcrEngine, Recognition};

/// TSV level of word rows.
const WORD_LEVEL: &str = "5";

pub struct TesseractCli {
    program: PathBuf,
    lang: Option<String>,
}

impl TesseractCli {
    pub fn new(program: PathBuf, lang: Option<String>) -> Self {
        TesseractCli { program, lang }
    }

    /// Run `tesseract --version` and return its first line. Fails if the executable is missing.
    pub fn version(&self) -> Result<String> {
        let out = Command::new(&self.program)
            .arg("--version")
            .output()
            .with_context(|| format!("run {} --version", self.program.display()))?;
        if !out.status.success() {
            anyhow::bail!("{} --version exited with {}", self.program.display(), out.status);
        }
        // Older builds print the version on stderr.
        let text = if out.stdout.is_empty() {
            out.stderr
        } else {
            out.stdout
        };
        Ok(String::from_utf8_lossy(&text)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

impl OcrEngine for TesseractCli {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition, String> {
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image.to_luma8())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| format!("encode for tesseract: {e}"))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("stdin").arg("stdout");
        if let Some(ref lang) = self.lang {
            cmd.arg("-l").arg(lang);
        }
        cmd.arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("spawn {}: {e}", self.program.display()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| "tesseract stdin unavailable".to_string())?;

        // Feed stdin on a scoped thread so a full stdout pipe cannot stall the write.
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || stdin.write_all(&png));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            output.and_then(|o| written.map(|_| o))
        })
        .map_err(|e| format!("tesseract io: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Rebuild text and mean confidence from tesseract TSV output.
///
/// Words on the same (block, paragraph, line) are joined by spaces, lines by `\n`, and a blank
/// line separates blocks. Rows with negative confidence or empty text are ignored.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut current_line: Option<(&str, &str, &str)> = None;
    let mut current_block: Option<&str> = None;
    let mut conf_sum = 0.0_f64;
    let mut words = 0_usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        let conf: f64 = cols[10].trim().parse().unwrap_or(-1.0);
        if word.is_empty() || conf < 0.0 {
            continue;
        }
        let line_key = (cols[2], cols[3], cols[4]);
        match current_line {
            Some(prev) if prev == line_key => text.push(' '),
            Some(_) => {
                text.push('\n');
                if current_block != Some(cols[2]) {
                    text.push('\n');
                }
            }
            None => {}
        }
        current_line = Some(line_key);
        current_block = Some(cols[2]);
        text.push_str(word);
        conf_sum += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        (conf_sum / words as f64) as f32
    };
    Recognition { text, confidence }
}
