//! Encode/decode configuration (spec §6 "Encode configuration" / "Decode
//! configuration"), mirroring the teacher's `PackOptions` shape.

use serde::{Deserialize, Serialize};

use crate::codec::CompressionLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Fast,
    Max,
}

impl From<Compression> for CompressionLevel {
    fn from(c: Compression) -> Self {
        match c {
            Compression::None => CompressionLevel::None,
            Compression::Fast => CompressionLevel::Fast,
            Compression::Max => CompressionLevel::Max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeConfig {
    pub dpi: u32,
    pub dot_percent: u32,
    pub redundancy: u8,
    pub compression: Compression,
    pub encryption: bool,
    pub password: Option<String>,
    /// Recognized per spec §6 but currently inert: it would toggle a
    /// human-readable text header printed in the page margin (filename,
    /// page N of M), distinct from the always-present superblock cell that
    /// decoding actually depends on. No font-rendering crate exists
    /// anywhere in this crate's dependency stack (see DESIGN.md), so there
    /// is nothing to gate yet; stored and round-tripped through config so
    /// callers don't lose the setting if that lands later.
    pub print_header: bool,
    pub print_border: bool,
    pub paper_w_thou: u32,
    pub paper_h_thou: u32,
    /// Escape hatch for the silently-disable-compression open question
    /// (spec §9): when true, keep compression even if it didn't shrink
    /// the data.
    pub force_compression: bool,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        EncodeConfig {
            dpi: 200,
            dot_percent: 80,
            redundancy: 5,
            compression: Compression::None,
            encryption: false,
            password: None,
            print_header: true,
            print_border: false,
            paper_w_thou: 8270,
            paper_h_thou: 11690,
            force_compression: false,
        }
    }
}

impl EncodeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(100..=1200).contains(&self.dpi) {
            return Err(format!("dpi {} out of range [100,1200]", self.dpi));
        }
        if !(50..=100).contains(&self.dot_percent) {
            return Err(format!("dot_percent {} out of range [50,100]", self.dot_percent));
        }
        if !(2..=10).contains(&self.redundancy) {
            return Err(format!("redundancy {} out of range [2,10]", self.redundancy));
        }
        if self.encryption && self.password.as_ref().map_or(true, |p| p.is_empty()) {
            return Err("encryption requires a non-empty password".into());
        }
        if let Some(p) = &self.password {
            if p.len() > 32 {
                return Err("password must be <= 32 bytes".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeConfig {
    pub password: Option<String>,
    pub best_quality: bool,
}
