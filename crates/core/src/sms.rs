use serde::{Deserialize, Serialize};

/// Characters per estimated SMS part.
pub const SMS_SEGMENT_LENGTH: usize = 99;

/// Informational part count shown next to the SMS editor. The message itself
/// is sent whole; nothing is split or truncated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsSegmentation {
    pub char_count: usize,
    pub segments: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SmsSegmenter;

impl SmsSegmenter {
    pub fn segment(&self, text: &str) -> SmsSegmentation {
        let char_count = text.chars().count();
        let segments = char_count.div_ceil(SMS_SEGMENT_LENGTH).max(1);
        SmsSegmentation { char_count, segments }
    }
}

#[cfg(test)]
mod tests {
    use super::{SmsSegmenter, SMS_SEGMENT_LENGTH};

    #[test]
    fn boundary_counts() {
        let segmenter = SmsSegmenter;
        assert_eq!(segmenter.segment("").segments, 1);
        assert_eq!(segmenter.segment(&"a".repeat(SMS_SEGMENT_LENGTH)).segments, 1);
        assert_eq!(segmenter.segment(&"a".repeat(100)).segments, 2);
        assert_eq!(segmenter.segment(&"a".repeat(198)).segments, 2);
        assert_eq!(segmenter.segment(&"a".repeat(199)).segments, 3);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(99);
        let segmentation = SmsSegmenter.segment(&text);
        assert_eq!(segmentation.char_count, 99);
        assert_eq!(segmentation.segments, 1);
    }
}
