/// Incremental UTF-8 decoder that carries partial sequences across chunk boundaries.
///
/// Malformed bytes decode to U+FFFD, as does an incomplete sequence left over at
/// the end of input.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buffered = std::mem::take(&mut self.pending);
        buffered.extend_from_slice(bytes);

        let mut decoded = String::with_capacity(buffered.len());
        let mut input = buffered.as_slice();

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, rest) = input.split_at(error.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));

                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[invalid_len..];
                        }
                        None => {
                            // At most three bytes of an unfinished character remain.
                            self.pending = rest.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        decoded
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flushes whatever is still buffered at end of input.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }

        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}
