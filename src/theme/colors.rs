use std::fmt;

/// An RGBA color as written in `.tmTheme` files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Build from a packed `0xRRGGBB` literal
    pub const fn from_u32(rgb: u32) -> Self {
        Self::rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
    }

    /// Parse from hex strings like "#ff0000", "#ff000080" or "#f00"
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

        match hex.len() {
            3 => {
                let mut digits = hex.chars().map(|c| c.to_digit(16).map(|d| (d * 17) as u8));
                let r = digits.next()??;
                let g = digits.next()??;
                let b = digits.next()??;
                Some(Self::rgb(r, g, b))
            }
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// `#rrggbb`, dropping alpha
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }

    // Common colors
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 0xff {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            write!(
                f,
                "#{:02X}{:02X}{:02X}{:02X}",
                self.r, self.g, self.b, self.a
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_parses_with_hash() {
        let color = Color::from_hex("#ff5500").unwrap();
        assert_eq!(color.r, 255);
        assert_eq!(color.g, 85);
        assert_eq!(color.b, 0);
        assert_eq!(color.a, 255);
    }

    #[test]
    fn from_hex_parses_without_hash() {
        let color = Color::from_hex("00ff00").unwrap();
        assert_eq!(color, Color::rgb(0, 255, 0));
    }

    #[test]
    fn from_hex_parses_alpha() {
        let color = Color::from_hex("#49483E80").unwrap();
        assert_eq!(color, Color::rgba(0x49, 0x48, 0x3e, 0x80));
        assert_eq!(color.to_string(), "#49483E80");
    }

    #[test]
    fn from_hex_parses_short_form() {
        assert_eq!(Color::from_hex("#fff"), Some(Color::WHITE));
    }

    #[test]
    fn from_hex_returns_none_for_invalid() {
        assert!(Color::from_hex("ffff").is_none());
        assert!(Color::from_hex("gggggg").is_none());
        assert!(Color::from_hex("#ééé").is_none());
    }

    #[test]
    fn display_is_uppercase_hex() {
        assert_eq!(Color::from_u32(0xF92672).to_string(), "#F92672");
        assert_eq!(Color::from_u32(0xF92672).to_hex(), "#f92672");
    }
}
