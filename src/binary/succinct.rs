//! Succinct (LOUDS-style) trie over a sorted key set.
//!
//! The trie is stored as three arrays:
//! - `leaves`: bit `n` is set when node `n` terminates a key
//! - `label_bitmap`: per node, one `0` bit for each child followed by a `1`
//! - `labels`: the edge byte of each child, in breadth-first order
//!
//! Bits are numbered LSB-first within each u64 word. Both the MRS and the SRS
//! formats store this structure; they only differ in how array lengths are
//! written.

use super::codec::{put_u64_list, ByteReader};
use crate::{Error, Result};

const SET_VERSION: u8 = 1;

/// Compact, immutable set of byte-string keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccinctSet {
    leaves: Vec<u64>,
    label_bitmap: Vec<u64>,
    labels: Vec<u8>,
}

fn set_bit(bitmap: &mut Vec<u64>, i: usize, value: bool) {
    let word = i >> 6;
    if word >= bitmap.len() {
        bitmap.resize(word + 1, 0);
    }
    if value {
        bitmap[word] |= 1u64 << (i & 63);
    }
}

fn get_bit(bitmap: &[u64], i: usize) -> bool {
    bitmap
        .get(i >> 6)
        .map(|word| word & (1u64 << (i & 63)) != 0)
        .unwrap_or(false)
}

/// Rank/select support over `label_bitmap`, built once per traversal.
struct BitIndex {
    /// Number of ones before word `i`.
    ranks: Vec<usize>,
    /// Positions of every one bit, in order.
    ones: Vec<usize>,
}

impl BitIndex {
    fn new(bitmap: &[u64]) -> Self {
        let mut ranks = Vec::with_capacity(bitmap.len() + 1);
        let mut ones = Vec::new();
        let mut count = 0;
        for (w, &word) in bitmap.iter().enumerate() {
            ranks.push(count);
            let mut bits = word;
            while bits != 0 {
                let tz = bits.trailing_zeros() as usize;
                ones.push(w * 64 + tz);
                bits &= bits - 1;
            }
            count += word.count_ones() as usize;
        }
        ranks.push(count);
        Self { ranks, ones }
    }

    /// Number of zero bits in `[0, i)`.
    fn count_zeros(&self, bitmap: &[u64], i: usize) -> usize {
        let word = i >> 6;
        let ones_before = match bitmap.get(word) {
            Some(w) => {
                let mask = (1u64 << (i & 63)) - 1;
                self.ranks[word] + (w & mask).count_ones() as usize
            }
            None => self.ranks[self.ranks.len() - 1],
        };
        i - ones_before
    }

    /// Position of the `i`-th one bit (0-based).
    fn select_one(&self, i: usize) -> Option<usize> {
        self.ones.get(i).copied()
    }
}

impl SuccinctSet {
    /// Build a set from keys. Keys are sorted and deduplicated first.
    pub fn new<S: AsRef<[u8]>>(keys: &[S]) -> Self {
        let mut keys: Vec<&[u8]> = keys.iter().map(AsRef::as_ref).collect();
        keys.sort_unstable();
        keys.dedup();

        let mut set = SuccinctSet::default();
        if keys.is_empty() {
            // A lone root with no children.
            set_bit(&mut set.leaves, 0, false);
            set_bit(&mut set.label_bitmap, 0, true);
            return set;
        }

        let mut label_idx = 0usize;
        // (start, end, column) of the key range under each node.
        let mut queue: Vec<(usize, usize, usize)> = vec![(0, keys.len(), 0)];
        let mut i = 0;
        while i < queue.len() {
            let (mut start, end, col) = queue[i];
            if col == keys[start].len() {
                start += 1;
                set_bit(&mut set.leaves, i, true);
            }
            let mut j = start;
            while j < end {
                let from = j;
                let label = keys[from][col];
                while j < end && keys[j][col] == label {
                    j += 1;
                }
                queue.push((from, j, col + 1));
                set.labels.push(label);
                set_bit(&mut set.label_bitmap, label_idx, false);
                label_idx += 1;
            }
            set_bit(&mut set.label_bitmap, label_idx, true);
            label_idx += 1;
            i += 1;
        }
        // Make sure every node id has a leaves word.
        set_bit(&mut set.leaves, queue.len() - 1, false);
        set
    }

    /// Enumerate all keys in lexicographic order.
    ///
    /// The walk keeps its own frame stack, so a crafted node chain fails with
    /// a parse error instead of exhausting the call stack.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let index = BitIndex::new(&self.label_bitmap);
        let total_bits = self.label_bitmap.len() * 64;
        let mut result = Vec::new();
        let mut current = Vec::new();
        if get_bit(&self.leaves, 0) {
            result.push(Vec::new());
        }
        // (label bitmap cursor, node id)
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        while let Some(frame) = stack.last_mut() {
            let (bm_idx, node_id) = *frame;
            if bm_idx >= total_bits {
                return Err(Error::Parse("succinct set: label bitmap overrun".to_string()));
            }
            if get_bit(&self.label_bitmap, bm_idx) {
                stack.pop();
                if !stack.is_empty() {
                    current.pop();
                }
                continue;
            }
            let label = bm_idx
                .checked_sub(node_id)
                .and_then(|i| self.labels.get(i))
                .copied()
                .ok_or_else(|| Error::Parse("succinct set: label index out of range".to_string()))?;
            let next_node = index.count_zeros(&self.label_bitmap, bm_idx + 1);
            if next_node <= node_id {
                return Err(Error::Parse("succinct set: malformed node order".to_string()));
            }
            let next_bm_idx = index
                .select_one(next_node - 1)
                .ok_or_else(|| Error::Parse("succinct set: missing node terminator".to_string()))?
                + 1;
            frame.0 += 1;
            current.push(label);
            if get_bit(&self.leaves, next_node) {
                result.push(current.clone());
            }
            stack.push((next_bm_idx, next_node));
        }
        Ok(result)
    }

    /// Write with uvarint array lengths (sing-box layout).
    pub fn write_uvarint(&self, buf: &mut Vec<u8>) {
        buf.push(SET_VERSION);
        put_u64_list(buf, &self.leaves);
        put_u64_list(buf, &self.label_bitmap);
        super::codec::put_uvarint_bytes(buf, &self.labels);
    }

    /// Read the uvarint-length layout.
    pub fn read_uvarint(reader: &mut ByteReader<'_>) -> Result<Self> {
        check_version(reader.read_u8()?)?;
        let leaves = reader.read_u64_list()?;
        let label_bitmap = reader.read_u64_list()?;
        let labels = reader.read_uvarint_bytes()?.to_vec();
        Ok(Self {
            leaves,
            label_bitmap,
            labels,
        })
    }

    /// Write with big-endian i64 array lengths (mihomo layout).
    pub fn write_i64(&self, buf: &mut Vec<u8>) {
        buf.push(SET_VERSION);
        for words in [&self.leaves, &self.label_bitmap] {
            buf.extend_from_slice(&(words.len() as i64).to_be_bytes());
            for word in words {
                buf.extend_from_slice(&word.to_be_bytes());
            }
        }
        buf.extend_from_slice(&(self.labels.len() as i64).to_be_bytes());
        buf.extend_from_slice(&self.labels);
    }

    /// Read the i64-length layout. Every array must be non-empty.
    pub fn read_i64(reader: &mut ByteReader<'_>) -> Result<Self> {
        check_version(reader.read_u8()?)?;
        let read_words = |reader: &mut ByteReader<'_>| -> Result<Vec<u64>> {
            let len = reader.read_i64_len(1)?;
            if len > reader.remaining() / 8 {
                return Err(Error::Parse(format!("invalid length: {}", len)));
            }
            (0..len).map(|_| reader.read_u64_be()).collect()
        };
        let leaves = read_words(reader)?;
        let label_bitmap = read_words(reader)?;
        let len = reader.read_i64_len(1)?;
        let labels = reader.read_bytes(len)?.to_vec();
        Ok(Self {
            leaves,
            label_bitmap,
            labels,
        })
    }
}

fn check_version(version: u8) -> Result<()> {
    if version != SET_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(())
}
