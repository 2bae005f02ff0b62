use log::debug;

/// Comment key holding the first sample of the looped region.
pub const LOOP_START_KEY: &str = "LOOPSTART";
/// Comment key holding the length of the looped region in samples.
pub const LOOP_LENGTH_KEY: &str = "LOOPLENGTH";

/// Bytes per decoder sample in the engine's stereo 16-bit PCM stream.
pub const FRAME_SCALE: u64 = 4;

/// Loop boundaries of one track.
///
/// Built in decoder sample units by [`LoopDescriptor::from_comments`], then
/// converted to engine byte offsets with [`LoopDescriptor::scaled`]. When a
/// track carries no usable markers the descriptor plays straight through:
/// `start` is zero, `length` is `u64::MAX` and `end` is the track length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopDescriptor {
    pub start: u64,
    pub length: u64,
    pub end: u64,
    pub total: u64,
}

impl LoopDescriptor {
    /// Descriptor for a track without loop markers. A `total` of zero means
    /// the length is unknown and playback only ends when the decoder does.
    pub fn straight_through(total: u64) -> Self {
        Self {
            start: 0,
            length: u64::MAX,
            end: if total == 0 { u64::MAX } else { total },
            total,
        }
    }

    /// Parse `KEY=value` comments into loop boundaries.
    ///
    /// Keys are matched case-insensitively after removing whitespace. Values that
    /// do not parse as integers are ignored and the last valid occurrence of a
    /// key wins. Looping is enabled only when both values are positive.
    pub fn from_comments<I, S>(comments: I, total_samples: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loop_start: i64 = 0;
        let mut loop_length: i64 = 0;

        for comment in comments {
            let compact: String = comment.as_ref().chars().filter(|c| !c.is_whitespace()).collect();
            let Some((key, value)) = compact.split_once('=') else {
                continue;
            };

            let slot = if key.eq_ignore_ascii_case(LOOP_START_KEY) {
                &mut loop_start
            } else if key.eq_ignore_ascii_case(LOOP_LENGTH_KEY) {
                &mut loop_length
            } else {
                continue;
            };

            match value.parse::<i64>() {
                Ok(parsed) => *slot = parsed,
                Err(_) => debug!("Ignoring malformed loop annotation '{}'", comment.as_ref()),
            }
        }

        if loop_start > 0 && loop_length > 0 {
            let start = loop_start as u64;
            let length = loop_length as u64;
            Self {
                start,
                length,
                end: start + length,
                total: total_samples,
            }
        } else {
            Self::straight_through(total_samples)
        }
    }

    /// Convert every boundary by the same factor, keeping the sentinels intact.
    pub fn scaled(&self, factor: u64) -> Self {
        let scale = |value: u64| {
            if value == u64::MAX {
                value
            } else {
                value.saturating_mul(factor)
            }
        };

        Self {
            start: scale(self.start),
            length: scale(self.length),
            end: scale(self.end),
            total: scale(self.total),
        }
    }

    /// Scale decoder sample units to engine byte offsets.
    pub fn to_byte_offsets(&self) -> Self {
        self.scaled(FRAME_SCALE)
    }

    /// Whether reaching `end` wraps back to `start` instead of finishing.
    pub fn is_looping(&self) -> bool {
        self.length != u64::MAX
    }

    /// Whether `position` lies inside the seekable range `[0, end)`.
    pub fn contains(&self, position: u64) -> bool {
        position < self.end
    }
}
