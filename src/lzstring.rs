//! LZ-string `decompressFromBase64`.
//!
//! Packed page scripts ship their symbol table compressed with the
//! LZ-string algorithm and encoded over a 64 character alphabet. Output
//! must match the reference implementation exactly: one wrong code unit
//! corrupts every symbol that follows it.

const BASE64_KEY: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=";

/// Each base64 character carries six bits, most significant first.
const BITS_PER_CHAR: u32 = 6;

const LITERAL_8: usize = 0;
const LITERAL_16: usize = 1;
const END_OF_STREAM: usize = 2;

/// Reads the compressed stream one bit at a time.
struct BitReader<I> {
    source: I,
    value: u16,
    position: u16,
}

impl<I> BitReader<I>
where
    I: Iterator<Item = u16>,
{
    const RESET: u16 = 1 << (BITS_PER_CHAR - 1);

    fn new(mut source: I) -> Option<Self> {
        Some(Self {
            value: source.next()?,
            source,
            position: Self::RESET,
        })
    }

    fn read_bit(&mut self) -> Option<bool> {
        let bit = self.value & self.position != 0;
        self.position >>= 1;

        if self.position == 0 {
            self.position = Self::RESET;
            self.value = self.source.next()?;
        }

        Some(bit)
    }

    /// Reads `count` bits, least significant first.
    ///
    /// # Returns
    ///
    /// The assembled value, or `None` once the stream runs dry
    fn read_bits(&mut self, count: u32) -> Option<u32> {
        let mut bits = 0u32;
        for shift in 0..count {
            bits |= u32::from(self.read_bit()?).checked_shl(shift)?;
        }
        Some(bits)
    }
}

/// Decompresses an LZ-string base64 payload into UTF-16 code units.
///
/// Characters outside the base64 alphabet (line breaks, stray whitespace)
/// are skipped. An empty input decompresses to an empty vector.
///
/// Returns `None` if the stream is truncated or references a dictionary
/// entry that does not exist yet.
///
/// # Examples
///
/// ```rust
/// let units = packed_imgdata::lzstring::decompress_from_base64("BYUwNmD2A+DukCcwBMg=").unwrap();
/// assert_eq!(String::from_utf16(&units).unwrap(), "hello|world");
/// ```
pub fn decompress_from_base64(compressed: &str) -> Option<Vec<u16>> {
    let values = compressed
        .bytes()
        .filter_map(|byte| BASE64_KEY.iter().position(|&key| key == byte))
        .map(|index| index as u16);

    decompress(values)
}

/// Like [`decompress_from_base64`], but decodes the result as UTF-16.
///
/// This is the shape callers want for compressed HTML fragments, such as
/// chapter lists hidden in a form field.
pub fn decompress_to_string(compressed: &str) -> Option<String> {
    String::from_utf16(&decompress_from_base64(compressed)?).ok()
}

fn decompress<I>(values: I) -> Option<Vec<u16>>
where
    I: Iterator<Item = u16>,
{
    let Some(mut reader) = BitReader::new(values) else {
        return Some(Vec::new());
    };

    let mut dictionary: Vec<Vec<u16>> = (0..3).map(|code| vec![code]).collect();

    let first = match reader.read_bits(2)? as usize {
        LITERAL_8 => reader.read_bits(8)? as u16,
        LITERAL_16 => reader.read_bits(16)? as u16,
        END_OF_STREAM => return Some(Vec::new()),
        _ => return None,
    };
    dictionary.push(vec![first]);

    let mut previous = vec![first];
    let mut output = vec![first];
    let mut num_bits = 3u32;
    let mut enlarge_in = 4u32;

    loop {
        let mut code = reader.read_bits(num_bits)? as usize;
        match code {
            LITERAL_8 | LITERAL_16 => {
                let width = if code == LITERAL_8 { 8 } else { 16 };
                dictionary.push(vec![reader.read_bits(width)? as u16]);
                code = dictionary.len() - 1;
                enlarge_in -= 1;
            }
            END_OF_STREAM => return Some(output),
            _ => {}
        }

        if enlarge_in == 0 {
            enlarge_in = 1u32.checked_shl(num_bits)?;
            num_bits += 1;
        }

        let entry = match dictionary.get(code) {
            Some(entry) => entry.clone(),
            // cScSc case: the code refers to the entry being built right now
            None if code == dictionary.len() => {
                let mut entry = previous.clone();
                entry.push(*previous.first()?);
                entry
            }
            None => return None,
        };

        output.extend_from_slice(&entry);

        let mut next = previous;
        next.push(*entry.first()?);
        dictionary.push(next);
        enlarge_in -= 1;

        previous = entry;

        if enlarge_in == 0 {
            enlarge_in = 1u32.checked_shl(num_bits)?;
            num_bits += 1;
        }
    }
}
