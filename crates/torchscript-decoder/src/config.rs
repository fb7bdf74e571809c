use derive_new::new;

/// Decoder settings.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct DecoderConfig {
    /// Try to share tensor storage before copying constants.
    #[new(value = "true")]
    pub zero_copy: bool,
    /// Detach tensors, make them contiguous and move them to the host before
    /// building constants.
    #[new(value = "true")]
    pub detach_tensors: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderConfig {
    /// Enable or disable the zero-copy constant path.
    pub fn with_zero_copy(mut self, zero_copy: bool) -> Self {
        self.zero_copy = zero_copy;
        self
    }

    /// Enable or disable tensor coercion before constant creation.
    pub fn with_detach_tensors(mut self, detach_tensors: bool) -> Self {
        self.detach_tensors = detach_tensors;
        self
    }
}
