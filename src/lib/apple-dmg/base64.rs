//! Base64 as it appears in `<data>` elements of UDIF property lists.
//! Reading goes through `plist`; only the writer's line layout lives here.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encodes `data` into lines of at most `width` characters, each prefixed
/// with `tabs` tab characters and ended by a newline.
pub fn encode(data: &[u8], tabs: usize, width: usize) -> String {
    let width = width.max(4) / 4 * 4;
    let mut out = String::with_capacity(data.len() * 4 / 3 + data.len() / width * (tabs + 1) + 8);
    let mut line = 0;
    for chunk in data.chunks(3) {
        if line == 0 {
            out.extend(std::iter::repeat_n('\t', tabs));
        }
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let chars = [
            ALPHABET[(b[0] >> 2) as usize],
            ALPHABET[(((b[0] & 0x03) << 4) | (b[1] >> 4)) as usize],
            ALPHABET[(((b[1] & 0x0F) << 2) | (b[2] >> 6)) as usize],
            ALPHABET[(b[2] & 0x3F) as usize],
        ];
        for (i, &c) in chars.iter().enumerate() {
            out.push(if i > chunk.len() { '=' } else { c as char });
        }
        line += 4;
        if line >= width {
            out.push('\n');
            line = 0;
        }
    }
    if line != 0 {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc4648_vectors() {
        let vectors: [(&str, &str); 7] = [
            ("", ""),
            ("f", "Zg=="),
            ("fo", "Zm8="),
            ("foo", "Zm9v"),
            ("foob", "Zm9vYg=="),
            ("fooba", "Zm9vYmE="),
            ("foobar", "Zm9vYmFy"),
        ];
        for (plain, encoded) in vectors {
            let expected = if encoded.is_empty() {
                String::new()
            } else {
                format!("{encoded}\n")
            };
            assert_eq!(encode(plain.as_bytes(), 0, 52), expected);
        }
    }

    #[test]
    fn wraps_and_indents() {
        let data: Vec<u8> = (0..=255).collect();
        let text = encode(&data, 3, 52);
        for line in text.lines() {
            assert!(line.starts_with("\t\t\t"));
            assert!(line.len() <= 3 + 52);
        }
        assert_eq!(text.lines().next().map(str::len), Some(3 + 52));
        assert_eq!(text.lines().count(), 7);
        assert!(text.ends_with("+/w==\n"));
    }
}
