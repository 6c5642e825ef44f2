//! Colour parsing for the background and draw styles.
//!
//! Colours are ARGB integers with a 7 bit alpha channel: 0x00 is opaque,
//! 0x7f fully transparent. The most significant bit is always cleared.

use log::warn;

/// X11-style colour names recognized next to `#AARRGGBB` values.
const COLOR_DEF: &[(&str, u32)] = &[
    ("white", 0x00ffffff),
    ("black", 0x00000000),
    ("red", 0x00ff0000),
    ("green", 0x00008000),
    ("lime", 0x0000ff00),
    ("blue", 0x000000ff),
    ("navy", 0x00000080),
    ("yellow", 0x00ffff00),
    ("cyan", 0x0000ffff),
    ("magenta", 0x00ff00ff),
    ("brown", 0x00a52a2a),
    ("orange", 0x00ffa500),
    ("violet", 0x00ee82ee),
    ("purple", 0x00800080),
    ("pink", 0x00ffc0cb),
    ("gray", 0x00808080),
    ("grey", 0x00808080),
    ("lightgray", 0x00d3d3d3),
    ("darkgray", 0x00a9a9a9),
    ("silver", 0x00c0c0c0),
    ("maroon", 0x00800000),
    ("olive", 0x00808000),
    ("teal", 0x00008080),
    ("aqua", 0x0000ffff),
    ("transparent", 0x7f000000),
];

/// Parses a colour string. This is either a colour name, e.g. "green", or
/// an HTML-style value `#AARRGGBB` or `#RRGGBB`. Transparency ranges from
/// 0x00 (opaque) to 0x7f (transparent). Unparseable strings yield 0
/// (black) with a warning.
pub fn parse_color(s: &str) -> u32 {
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 && hex.len() != 8 {
            warn!("format error in HTML color '#{hex}'");
            return 0;
        }
        return match u32::from_str_radix(hex, 16) {
            Ok(c) => c & 0x7fffffff,
            Err(_) => {
                warn!("cannot convert HTML color '#{hex}'");
                0
            }
        };
    }

    for &(name, col) in COLOR_DEF {
        if name == s {
            return col;
        }
    }

    warn!("unknown color {s}, defaulting to black");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named() {
        assert_eq!(parse_color("white"), 0x00ffffff);
        assert_eq!(parse_color("transparent"), 0x7f000000);
    }

    #[test]
    fn test_html() {
        assert_eq!(parse_color("#102030"), 0x00102030);
        assert_eq!(parse_color("#7f102030"), 0x7f102030);
        // the MSB is always cleared
        assert_eq!(parse_color("#ff102030"), 0x7f102030);
    }

    #[test]
    fn test_bad() {
        assert_eq!(parse_color("#12345"), 0);
        assert_eq!(parse_color("nosuchcolor"), 0);
    }
}
