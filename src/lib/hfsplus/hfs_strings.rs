use core::cmp::Ordering;

// Case folding used by HFS+ catalog keys. NUL code units are ignored.
fn fold(c: u16) -> u16 {
    match c {
        0x41..=0x5A => c + 0x20,
        0x00..=0x7F => c,
        _ => match char::from_u32(c as u32) {
            Some(ch) => {
                let mut lower = ch.to_lowercase();
                match (lower.next(), lower.next()) {
                    (Some(l), None) if (l as u32) <= 0xFFFF => l as u32 as u16,
                    _ => c,
                }
            }
            None => c,
        },
    }
}

pub fn fast_unicode_compare(str1: &[u16], str2: &[u16]) -> Ordering {
    let mut a = str1.iter().map(|&c| fold(c)).filter(|&c| c != 0);
    let mut b = str2.iter().map(|&c| fold(c)).filter(|&c| c != 0);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x != y => return x.cmp(&y),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn comparison_ignores_case() {
        assert_eq!(
            fast_unicode_compare(&utf16("ReadMe.TXT"), &utf16("readme.txt")),
            Ordering::Equal
        );
        assert_eq!(
            fast_unicode_compare(&utf16("Ärger"), &utf16("ärger")),
            Ordering::Equal
        );
    }

    #[test]
    fn empty_name_sorts_first() {
        assert_eq!(fast_unicode_compare(&[], &utf16("a")), Ordering::Less);
        assert_eq!(fast_unicode_compare(&utf16("b"), &utf16("A")), Ordering::Greater);
    }
}
