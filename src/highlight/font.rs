/// Font applied to highlighted text
#[derive(Debug, Clone, PartialEq)]
pub struct Font {
    pub family: String,
    /// Point size
    pub size: f32,
}

impl Font {
    pub fn new(family: &str, size: f32) -> Self {
        Self {
            family: family.to_string(),
            size,
        }
    }

    /// `font-family` and `font-size` declarations for inline CSS
    pub fn css(&self) -> String {
        format!("font-family:{};font-size:{}pt", self.family, self.size)
    }
}

impl Default for Font {
    fn default() -> Self {
        Self::new("monospace", 12.0)
    }
}
