//! Simulator configuration.
//!
//! One immutable value built by the enclosing program (usually from the
//! command line) and handed to the core at construction. The core itself
//! only consumes the RAM size, the cycle budget and the trace sink; the
//! remaining fields parameterize the loader and an external presentation
//! front-end.

use std::path::PathBuf;

/// Simulator configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// RAM size in bytes.
    pub ram_size: u64,

    /// Maximum number of CPU cycles to simulate (-1 = unbounded).
    pub max_cycles: i64,

    /// Debug trace output path (None = tracing disabled).
    pub trace_path: Option<PathBuf>,

    /// Override for the program load address. When unset, the first word of
    /// the binary image is the load address.
    pub load_addr: Option<u32>,

    /// Print stats and progress information.
    pub verbose: bool,

    /// Graphics parameters, read by an external presentation layer as the
    /// framebuffer defaults.
    pub gfx: GfxConfig,
}

/// Framebuffer defaults for a presentation front-end.
#[derive(Debug, Clone)]
pub struct GfxConfig {
    pub enabled: bool,
    /// Framebuffer start address.
    pub addr: u32,
    /// Palette start address.
    pub pal_addr: u32,
    /// Framebuffer width in pixels.
    pub width: u32,
    /// Framebuffer height in pixels.
    pub height: u32,
    /// Bits per pixel.
    pub depth: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ram_size: 0x0100_0000, // 16 MiB
            max_cycles: -1,
            trace_path: None,
            load_addr: None,
            verbose: false,
            gfx: GfxConfig::default(),
        }
    }
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: 0x0000_8000,
            pal_addr: 0,
            width: 256,
            height: 256,
            depth: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.ram_size, 16 * 1024 * 1024);
        assert_eq!(config.max_cycles, -1);
        assert!(config.trace_path.is_none());
        assert!(!config.gfx.enabled);
        assert_eq!(config.gfx.width, 256);
    }
}
