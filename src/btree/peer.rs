//! Peer viewers: registration, restricted ranges and per-peer pixel
//! metrics.
//!
//! Every line and node keeps one metrics slot per registered peer. Adding
//! or removing a peer touches every line and node once; removal compacts
//! the slots by moving the last peer into the freed one.

use super::arena::{LineId, NodeId, SegId};
use super::{BTree, Gravity, MarkInfo, NodePixels, Peer, PixelInfo, Segment, SegmentKind, TextIndex};
use crate::error::{Error, Result};
use crate::event::{LogLevel, emit_log};
use crate::tagset::TagSet;

/// Slot of a registered peer viewer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub(crate) usize);

impl PeerId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl BTree {
    /// Register a new peer. Its metrics start at zero for every line.
    pub fn add_client(&mut self) -> PeerId {
        let peer = PeerId(self.peers.len());
        self.peers.push(Peer::default());
        for (_, line) in self.lines.iter_mut() {
            line.pixels.push(PixelInfo::default());
        }
        for (_, node) in self.nodes.iter_mut() {
            node.pixels.push(NodePixels::default());
        }
        emit_log(LogLevel::Info, &format!("btree: added peer {}", peer.0));
        peer
    }

    /// Unregister `peer`. When another peer had to move into the freed
    /// slot, returns `(old, new)` for it.
    pub fn remove_client(&mut self, peer: PeerId) -> Result<Option<(PeerId, PeerId)>> {
        self.check_peer(peer)?;
        let removed = self.peers.swap_remove(peer.0);
        if let Some((start, end)) = removed.range {
            self.drop_range_marker(start);
            self.drop_range_marker(end);
        }
        for (_, line) in self.lines.iter_mut() {
            line.pixels.swap_remove(peer.0);
        }
        for (_, node) in self.nodes.iter_mut() {
            node.pixels.swap_remove(peer.0);
        }
        let last = self.peers.len();
        emit_log(LogLevel::Info, &format!("btree: removed peer {}", peer.0));
        Ok((peer.0 != last).then_some((PeerId(last), peer)))
    }

    #[must_use]
    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    fn check_peer(&self, peer: PeerId) -> Result<()> {
        if peer.0 < self.peers.len() {
            Ok(())
        } else {
            Err(Error::InvalidPeer(peer.0))
        }
    }

    fn check_line(&self, number: usize) -> Result<LineId> {
        let line_count = self.line_count();
        if number < line_count {
            Ok(self.line_at(number))
        } else {
            Err(Error::LineOutOfRange {
                line: number,
                line_count,
            })
        }
    }

    /// Restrict `peer` to lines `[start_line, end_line)`, or lift the
    /// restriction with `None`.
    pub fn set_peer_range(&mut self, peer: PeerId, range: Option<(usize, usize)>) -> Result<()> {
        self.check_peer(peer)?;
        if let Some((start, end)) = range {
            if start > end {
                return Err(Error::InvalidPeerRange { start, end });
            }
            self.check_line(end)?;
        }
        if let Some((start, end)) = self.peers[peer.0].range.take() {
            self.drop_range_marker(start);
            self.drop_range_marker(end);
        }
        if let Some((start, end)) = range {
            let start = self.range_marker(TextIndex::new(start, 0), Gravity::Left);
            let end = self.range_marker(TextIndex::new(end, 0), Gravity::Right);
            self.peers[peer.0].range = Some((start, end));
        }
        self.bump_epoch();
        self.debug_check("set_peer_range");
        Ok(())
    }

    /// Start and end of the text visible to `peer`.
    pub fn peer_range(&self, peer: PeerId) -> Result<(TextIndex, TextIndex)> {
        self.check_peer(peer)?;
        Ok(match self.peers[peer.0].range {
            Some((start, end)) => (self.seg_index(start), self.seg_index(end)),
            None => (TextIndex::START, self.end_index()),
        })
    }

    fn range_marker(&mut self, at: TextIndex, gravity: Gravity) -> SegId {
        let seg = self.segs.alloc(Segment::new(
            SegmentKind::Mark(MarkInfo { name: None, gravity }),
            TagSet::empty(),
        ));
        let at = self.clamp_to_end(at);
        self.place_mark(seg, at);
        seg
    }

    fn drop_range_marker(&mut self, seg: SegId) {
        if let Some(prev) = self.unlink_segment(seg) {
            if self.segs.contains(prev) {
                self.join_chars_around(prev);
            }
        }
        self.segs.free(seg);
    }

    /// Pixel height of line `number` for `peer`.
    pub fn line_height(&self, peer: PeerId, number: usize) -> Result<u32> {
        self.check_peer(peer)?;
        let line = self.check_line(number)?;
        Ok(self.lines[line].pixels[peer.0].height)
    }

    /// Display line count of line `number` for `peer`.
    pub fn display_lines(&self, peer: PeerId, number: usize) -> Result<u32> {
        self.check_peer(peer)?;
        let line = self.check_line(number)?;
        Ok(self.lines[line].pixels[peer.0].display_lines)
    }

    /// Store freshly computed metrics of line `number`. The sentinel line
    /// always keeps zero height.
    pub fn adjust_pixel_height(
        &mut self,
        peer: PeerId,
        number: usize,
        height: u32,
        display_lines: u32,
    ) -> Result<()> {
        self.check_peer(peer)?;
        let line = self.check_line(number)?;
        if line == self.last_line {
            return Ok(());
        }
        self.set_line_metrics(peer, line, height, display_lines);
        Ok(())
    }

    /// Give `count` lines starting at `start_line` the same `height` and a
    /// single display line each. Stops before the sentinel.
    pub fn update_pixel_heights(&mut self, peer: PeerId, start_line: usize, count: usize, height: u32) -> Result<()> {
        self.check_peer(peer)?;
        let mut line = self.check_line(start_line)?;
        for _ in 0..count {
            if line == self.last_line {
                break;
            }
            self.set_line_metrics(peer, line, height, 1);
            line = self.next_line(line);
        }
        Ok(())
    }

    fn set_line_metrics(&mut self, peer: PeerId, line: LineId, height: u32, display_lines: u32) {
        let slot = &mut self.lines[line].pixels[peer.0];
        let (old_height, old_lines) = (slot.height, slot.display_lines);
        slot.height = height;
        slot.display_lines = display_lines;
        let node = self.lines[line].node;
        self.update_path(node, |n| {
            let total = &mut n.pixels[peer.0];
            total.pixels = total.pixels - u64::from(old_height) + u64::from(height);
            total.display_lines = total.display_lines - u64::from(old_lines) + u64::from(display_lines);
        });
    }

    /// Cache the display-line start offsets of line `number`, valid until
    /// the next structural change.
    pub fn set_display_line_offsets(&mut self, peer: PeerId, number: usize, offsets: Vec<u32>) -> Result<()> {
        self.check_peer(peer)?;
        let line = self.check_line(number)?;
        let epoch = self.epoch;
        let slot = &mut self.lines[line].pixels[peer.0];
        slot.offsets = offsets;
        slot.epoch = epoch;
        Ok(())
    }

    /// Cached display-line offsets of line `number`; `None` when missing
    /// or computed before the last structural change.
    pub fn display_line_offsets(&self, peer: PeerId, number: usize) -> Result<Option<&[u32]>> {
        self.check_peer(peer)?;
        let line = self.check_line(number)?;
        let slot = &self.lines[line].pixels[peer.0];
        Ok((slot.epoch == self.epoch && !slot.offsets.is_empty()).then_some(slot.offsets.as_slice()))
    }

    /// Total pixel height of the document for `peer`.
    pub fn pixel_height_total(&self, peer: PeerId) -> Result<u64> {
        self.check_peer(peer)?;
        Ok(self.nodes[self.root].pixels[peer.0].pixels)
    }

    /// Pixel offset of the top of line `number` for `peer`.
    pub fn pixel_offset_of_line(&self, peer: PeerId, number: usize) -> Result<u64> {
        self.check_peer(peer)?;
        let line = self.check_line(number)?;
        let mut node: NodeId = self.lines[line].node;
        let mut offset = 0;
        let mut cur = self.nodes[node].first_line;
        while cur != line {
            offset += u64::from(self.lines[cur].pixels[peer.0].height);
            cur = self.next_line(cur);
        }
        while let Some(parent) = self.nodes[node].parent {
            for &child in &self.nodes[parent].children {
                if child == node {
                    break;
                }
                offset += self.nodes[child].pixels[peer.0].pixels;
            }
            node = parent;
        }
        Ok(offset)
    }

    /// Line containing vertical position `pixel` and the offset of
    /// `pixel` within it. Positions past the end map to the last line
    /// before the sentinel.
    pub fn line_at_pixel(&self, peer: PeerId, pixel: u64) -> Result<(usize, u64)> {
        self.check_peer(peer)?;
        let total = self.nodes[self.root].pixels[peer.0].pixels;
        let last = self.line_count() - 2;
        if pixel >= total {
            let top = self.pixel_offset_of_line(peer, last)?;
            return Ok((last, pixel.saturating_sub(top)));
        }
        let mut remaining = pixel;
        let mut number = 0;
        let mut node = self.root;
        loop {
            let n = &self.nodes[node];
            if n.level == 0 {
                let mut line = n.first_line;
                loop {
                    let height = u64::from(self.lines[line].pixels[peer.0].height);
                    if remaining < height {
                        return Ok((number, remaining));
                    }
                    remaining -= height;
                    number += 1;
                    line = self.next_line(line);
                }
            }
            let mut next = None;
            for &child in &n.children {
                let c = &self.nodes[child];
                let height = c.pixels[peer.0].pixels;
                if remaining < height {
                    next = Some(child);
                    break;
                }
                remaining -= height;
                number += c.num_lines;
            }
            node = next.unwrap_or_else(|| panic!("pixel {pixel} beyond node {node:?}"));
        }
    }
}
