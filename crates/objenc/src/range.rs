use std::ops::Range;

/// How a ciphertext window of one object splits into encryption blocks.
///
/// Block numbers are relative to the object. Head and tail are the blocks that the data window
/// covers only partially and that therefore need the old block contents; all interior blocks are
/// covered whole.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockPlan {
    block_size: u64,
    ct_start: u64,
    ct_end: u64,
    data_start: u64,
    data_end: u64,
    pub head: Option<u64>,
    pub interior: Range<u64>,
    pub tail: Option<u64>,
}

/// One block of a [`BlockPlan`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockSlot {
    pub index: u64,
    /// Ciphertext of the block, relative to the start of the ciphertext window.
    pub ct: Range<usize>,
    /// Part of the block inside the data window, relative to the block start.
    pub covered: Range<usize>,
    /// The same bytes, relative to the start of the data window.
    pub data: Range<usize>,
}

impl BlockSlot {
    pub fn is_whole(&self) -> bool {
        self.covered.start == 0 && self.covered.end == self.ct.len()
    }
}

impl BlockPlan {
    pub fn new(block_size: u64, ct_start: u64, ct_end: u64, data_start: u64, data_end: u64) -> Self {
        assert_eq!(ct_start % block_size, 0, "ciphertext window must be block aligned");
        assert!(ct_start < ct_end, "empty ciphertext window");
        assert!(
            data_start <= data_end && ct_start <= data_start && data_end <= ct_end,
            "data window {}..{} is outside of the ciphertext window {}..{}",
            data_start,
            data_end,
            ct_start,
            ct_end
        );

        let first = ct_start / block_size;
        let last = (ct_end - 1) / block_size;
        let mut plan = Self {
            block_size,
            ct_start,
            ct_end,
            data_start,
            data_end,
            head: None,
            interior: first..last + 1,
            tail: None,
        };

        if !plan.slot(first).is_whole() {
            plan.head = Some(first);
            plan.interior.start = first + 1;
        }
        if last != first && !plan.slot(last).is_whole() {
            plan.tail = Some(last);
            plan.interior.end = last;
        }
        plan
    }

    /// Blocks that have to be merged with their previous contents, in ascending order.
    pub fn boundaries(&self) -> impl Iterator<Item = u64> {
        self.head.into_iter().chain(self.tail)
    }

    pub fn slot(&self, index: u64) -> BlockSlot {
        let block_start = index * self.block_size;
        let block_end = (block_start + self.block_size).min(self.ct_end);
        debug_assert!(block_start >= self.ct_start && block_start < block_end);

        let covered_start = self.data_start.clamp(block_start, block_end);
        let covered_end = self.data_end.clamp(block_start, block_end);

        BlockSlot {
            index,
            ct: (block_start - self.ct_start) as usize..(block_end - self.ct_start) as usize,
            covered: (covered_start - block_start) as usize..(covered_end - block_start) as usize,
            data: (covered_start - self.data_start) as usize
                ..(covered_end - self.data_start) as usize,
        }
    }
}

/// A piece of a file-level byte range that falls into a single object.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ObjectChunk {
    pub object_no: u64,
    pub offset_in_object: u64,
    /// Position of the piece in the caller's buffer.
    pub buf: Range<usize>,
}

pub fn object_chunks(object_size: u64, offset: u64, len: usize) -> Vec<ObjectChunk> {
    let mut chunks = Vec::new();
    let mut position = 0;
    while position < len {
        let absolute = offset + position as u64;
        let offset_in_object = absolute % object_size;
        let piece = std::cmp::min(object_size - offset_in_object, (len - position) as u64) as usize;
        chunks.push(ObjectChunk {
            object_no: absolute / object_size,
            offset_in_object,
            buf: position..position + piece,
        });
        position += piece;
    }
    chunks
}
