use serde::{Deserialize, Serialize};

use crate::engine::errors::ConfigError;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;
use crate::render::backend::SurfaceSize;
use crate::render::{Color, CompositionParameters, Viewport};

/// Largest texture side a backend is assumed to support when nothing else is configured.
const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 16384;

/// Side of one checkerboard cell behind the canvas, in viewport pixels.
const DEFAULT_CHECKER_CELL: u32 = 16;

/// Main engine configuration. Contains the initial composition parameters as well as the
/// limits the engine enforces on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parameters the engine starts with
    pub parameters: CompositionParameters,
    /// Initial viewport the canvas is presented in
    pub viewport: Viewport,
    /// Maximum width or height of the atlas and canvas textures
    pub max_texture_dimension: u32,
    /// Checkerboard cell size used by the CPU presentation path
    pub checker_cell: u32,
    /// Capacity of the event channel; slow subscribers lag past it
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parameters: CompositionParameters::default(),
            viewport: Viewport::new(0, 0, 800, 600),
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            checker_cell: DEFAULT_CHECKER_CELL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let SurfaceSize { width, height } = self.parameters.canvas_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidCanvas { width, height });
        }
        if !self.parameters.scale.is_finite() {
            return Err(ConfigError::NotFinite {
                name: "scale",
                value: self.parameters.scale,
            });
        }
        if !self.parameters.max_rotation.is_finite() {
            return Err(ConfigError::NotFinite {
                name: "max_rotation",
                value: self.parameters.max_rotation,
            });
        }
        if self.max_texture_dimension == 0 {
            return Err(ConfigError::ZeroTextureLimit);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }

        Ok(())
    }
}

/// Builder for [`EngineConfig`]. Unset values keep their defaults.
#[derive(Debug, Default, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn canvas_size(mut self, width: u32, height: u32) -> Self {
        self.config.parameters.canvas_size = SurfaceSize { width, height };
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.config.parameters.iterations = iterations;
        self
    }

    pub fn max_rotation(mut self, fraction: f32) -> Self {
        self.config.parameters.max_rotation = fraction;
        self
    }

    pub fn scale(mut self, fraction: f32) -> Self {
        self.config.parameters.scale = fraction;
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.config.parameters.background = color;
        self
    }

    pub fn seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.config.parameters.seed = seed.into();
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport = Viewport::new(0, 0, width, height);
        self
    }

    pub fn max_texture_dimension(mut self, limit: u32) -> Self {
        self.config.max_texture_dimension = limit;
        self
    }

    pub fn checker_cell(mut self, cell: u32) -> Self {
        self.config.checker_cell = cell;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
