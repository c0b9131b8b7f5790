//! File reassembler (C9) — up to `MAX_CONCURRENT_FILES` concurrent `fproc`
//! slots, per-block ingestion, XOR-group recovery, and post-decrypt /
//! decompress finalize (spec §4.9).

use std::collections::HashMap;

use crate::block::{
    filetime_to_unix_seconds, Block, SuperblockFields, MAX_CONCURRENT_FILES, NDATA,
};
use crate::codec::decompress;
use crate::crc16::crc16;
use crate::crypto::aes_cbc_decrypt;
use crate::error::PaperbackError;

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validity {
    Empty,
    FromData,
    FromRecovery,
}

/// One in-flight file's reassembly state (spec §4.9 `fproc`).
pub struct FileProc {
    fields: SuperblockFields,
    nblock: u32,
    data: Vec<u8>,
    valid: Vec<Validity>,
    /// Pending recovery payloads keyed by the byte-index of the group's
    /// first data block; `(group_size, payload)`. Reconciled in
    /// `finish_page` once a group has exactly one missing member.
    recovery: HashMap<usize, (u8, [u8; NDATA])>,
    ngood: u32,
    nbad: u32,
    nrestored: u32,
    complete: bool,
    unreadable: bool,
}

impl FileProc {
    fn identity_matches(&self, f: &SuperblockFields) -> bool {
        self.fields.datasize == f.datasize
            && self.fields.origsize == f.origsize
            && self.fields.mode == f.mode
            && self.fields.filecrc == f.filecrc
            && self.fields.name == f.name
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_unreadable(&self) -> bool {
        self.unreadable
    }

    pub fn filename(&self) -> String {
        self.fields.filename()
    }

    pub fn counters(&self) -> (u32, u32, u32) {
        (self.ngood, self.nbad, self.nrestored)
    }
}

/// Table of up to `MAX_CONCURRENT_FILES` concurrently reassembling files
/// (spec §4.9). Single-threaded; concurrent decode streams must serialize
/// access or shard per-slot (spec §5).
#[derive(Default)]
pub struct Reassembler {
    slots: Vec<Option<FileProc>>,
}

impl Reassembler {
    pub fn new() -> Reassembler {
        Reassembler { slots: Vec::new() }
    }

    /// `start_next_page(superblock)`: find an existing slot matching
    /// identity fields byte-for-byte, or allocate a new one.
    pub fn start_next_page(&mut self, superblock: &Block) -> Result<usize, PaperbackError> {
        let fields = superblock.superblock_fields();
        if let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.as_ref().map_or(false, |p| p.identity_matches(&fields)))
        {
            return Ok(idx);
        }

        let nblock = div_ceil(fields.datasize, NDATA as u32);
        let proc = FileProc {
            nblock,
            data: vec![0u8; fields.datasize as usize],
            valid: vec![Validity::Empty; nblock as usize],
            recovery: HashMap::new(),
            ngood: 0,
            nbad: 0,
            nrestored: 0,
            complete: false,
            unreadable: false,
            fields,
        };

        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[idx] = Some(proc);
            return Ok(idx);
        }
        if self.slots.len() < MAX_CONCURRENT_FILES {
            self.slots.push(Some(proc));
            return Ok(self.slots.len() - 1);
        }
        Err(PaperbackError::SlotTableFull(MAX_CONCURRENT_FILES))
    }

    fn slot_mut(&mut self, slot: usize) -> &mut FileProc {
        self.slots[slot].as_mut().expect("slot must be occupied")
    }

    pub fn proc(&self, slot: usize) -> Option<&FileProc> {
        self.slots[slot].as_ref()
    }

    /// `add_block(block, slot)` (spec §4.9).
    pub fn add_block(&mut self, block: &Block, slot: usize) {
        let group_size = block.recovery_group_size();
        let proc = self.slot_mut(slot);

        if group_size == 0 {
            let addr = block.data_offset();
            if addr % NDATA as u32 != 0 {
                return;
            }
            let idx = (addr / NDATA as u32) as usize;
            if idx >= proc.nblock as usize {
                return;
            }
            if proc.valid[idx] != Validity::FromData {
                let start = idx * NDATA;
                let end = (start + NDATA).min(proc.data.len());
                proc.data[start..end].copy_from_slice(&block.payload()[..end - start]);
                proc.valid[idx] = Validity::FromData;
            }
        } else {
            let recsize = group_size as u32 * NDATA as u32;
            let base_addr = block.data_offset();
            if base_addr % recsize != 0 {
                return;
            }
            let base_idx = (base_addr / NDATA as u32) as usize;
            proc.recovery.insert(base_idx, (group_size, *block.payload()));
        }
    }

    /// `finish_page(slot, ngood, nbad)` (spec §4.9): update counters and
    /// attempt XOR recovery for every group with exactly one missing member.
    pub fn finish_page(&mut self, slot: usize, ngood: u32, nbad: u32) {
        let proc = self.slot_mut(slot);
        proc.ngood += ngood;
        proc.nbad += nbad;

        let groups: Vec<(usize, u8, [u8; NDATA])> = proc
            .recovery
            .iter()
            .map(|(&base, &(size, payload))| (base, size, payload))
            .collect();

        for (base_idx, group_size, payload) in groups {
            let group_size = group_size as usize;
            if base_idx + group_size > proc.nblock as usize {
                continue;
            }
            let missing: Vec<usize> = (0..group_size)
                .map(|g| base_idx + g)
                .filter(|&idx| proc.valid[idx] == Validity::Empty)
                .collect();
            if missing.len() != 1 {
                continue;
            }
            let target = missing[0];

            // "Invert the recovery block in place" then XOR with every
            // present data member, leaving exactly the missing payload.
            let mut acc = payload;
            for b in acc.iter_mut() {
                *b ^= 0xFF;
            }
            for g in 0..group_size {
                let idx = base_idx + g;
                if idx == target {
                    continue;
                }
                let start = idx * NDATA;
                let end = (start + NDATA).min(proc.data.len());
                for (a, &d) in acc.iter_mut().zip(proc.data[start..end].iter()) {
                    *a ^= d;
                }
            }

            let start = target * NDATA;
            let end = (start + NDATA).min(proc.data.len());
            proc.data[start..end].copy_from_slice(&acc[..end - start]);
            proc.valid[target] = Validity::FromRecovery;
            proc.nrestored += 1;
        }

        proc.complete = proc.valid.iter().all(|v| *v != Validity::Empty);
    }

    /// Called once the caller knows no further pages will arrive for this
    /// file (end of scan); marks it unreadable if still incomplete.
    pub fn give_up(&mut self, slot: usize) {
        let proc = self.slot_mut(slot);
        if !proc.complete {
            proc.unreadable = true;
        }
    }

    /// `finalize(slot)` (spec §4.9): optional decrypt, file-integrity CRC
    /// check, optional decompress, yield bytes + filename + modified time.
    pub fn finalize(
        &mut self,
        slot: usize,
        password: Option<&str>,
    ) -> Result<(Vec<u8>, String, i64), PaperbackError> {
        let proc = self.slots[slot].take().expect("slot must be occupied");
        if !proc.complete {
            let missing = proc.valid.iter().filter(|v| **v == Validity::Empty).count();
            self.slots[slot] = None;
            return Err(PaperbackError::PageIncomplete { missing });
        }

        let mut buf = proc.data;
        if proc.fields.is_encrypted() {
            let password = password.ok_or(PaperbackError::Unauthenticated)?;
            let key = crate::crypto::derive_key(password, &proc.fields.salt());
            buf = aes_cbc_decrypt(&key, &proc.fields.iv(), &buf)?;
        }

        if crc16(&buf) != proc.fields.filecrc {
            return Err(PaperbackError::Unauthenticated);
        }

        let out = if proc.fields.is_compressed() {
            decompress(&buf, proc.fields.origsize as usize)?
        } else {
            buf.truncate(proc.fields.origsize as usize);
            buf
        };

        let modified = filetime_to_unix_seconds(proc.fields.modified);
        Ok((out, proc.fields.filename(), modified))
    }

    /// Release a slot's buffers without finalizing (cancellation path).
    pub fn close(&mut self, slot: usize) {
        self.slots[slot] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, NDATA};

    fn fields(datasize: u32) -> SuperblockFields {
        SuperblockFields {
            datasize,
            pagesize: datasize,
            origsize: datasize,
            mode: 0,
            attributes: 0,
            page: 1,
            modified: 133_000_000_000_000_000,
            filecrc: crc16(&vec![0xABu8; datasize as usize]),
            name: {
                let mut n = [0u8; crate::block::FILENAME_SIZE];
                n[..4].copy_from_slice(b"t.db");
                n
            },
        }
    }

    #[test]
    fn reassembles_file_from_all_data_blocks() {
        let datasize = NDATA as u32 * 3;
        let sb_fields = fields(datasize);
        let superblock = Block::pack_superblock(&sb_fields);

        let mut r = Reassembler::new();
        let slot = r.start_next_page(&superblock).unwrap();
        for i in 0..3u32 {
            let block = Block::pack_data(i * NDATA as u32, &[0xABu8; NDATA]);
            r.add_block(&block, slot);
        }
        r.finish_page(slot, 3, 0);
        assert!(r.proc(slot).unwrap().is_complete());

        let (bytes, name, _modified) = r.finalize(slot, None).unwrap();
        assert_eq!(bytes, vec![0xABu8; datasize as usize]);
        assert_eq!(name, "t.db");
    }

    #[test]
    fn recovers_single_missing_data_block_via_xor() {
        let datasize = NDATA as u32 * 3;
        let sb_fields = fields(datasize);
        let superblock = Block::pack_superblock(&sb_fields);

        let mut r = Reassembler::new();
        let slot = r.start_next_page(&superblock).unwrap();

        let d0 = [0xABu8; NDATA];
        let d1 = [0xABu8; NDATA];
        let d2 = [0x37u8; NDATA];
        let mut xor = [0xFFu8; NDATA];
        for b in 0..NDATA {
            xor[b] ^= d0[b] ^ d1[b] ^ d2[b];
        }

        r.add_block(&Block::pack_data(0, &d0), slot);
        r.add_block(&Block::pack_data(NDATA as u32, &d1), slot);
        // d2 is withheld; recovery block covers the group of 3.
        r.add_block(&Block::pack_recovery(0, 3, &xor), slot);
        r.finish_page(slot, 2, 1);

        assert!(r.proc(slot).unwrap().is_complete());
        let (_, _, nrestored) = r.proc(slot).unwrap().counters();
        assert_eq!(nrestored, 1);
        let (bytes, _, _) = r.finalize(slot, None).unwrap();
        assert_eq!(&bytes[2 * NDATA..3 * NDATA], &d2[..]);
    }

    #[test]
    fn rejects_finalize_when_incomplete() {
        let datasize = NDATA as u32 * 2;
        let sb_fields = fields(datasize);
        let superblock = Block::pack_superblock(&sb_fields);
        let mut r = Reassembler::new();
        let slot = r.start_next_page(&superblock).unwrap();
        r.add_block(&Block::pack_data(0, &[1u8; NDATA]), slot);
        r.finish_page(slot, 1, 1);
        assert!(r.finalize(slot, None).is_err());
    }
}
