//! A flat, indexable byte view over a (possibly fragmented) runlist.

use crate::error::{NtfsError, Result};
use crate::runlist::Run;
use crate::volume::ClusterAccessor;

/// Presents a sequence of [`Run`]s as one logically contiguous byte buffer.
pub struct NonResidentView<'a> {
    clusters: ClusterAccessor<'a>,
    runs: Vec<Run>,
    len: u64,
}

impl<'a> NonResidentView<'a> {
    pub fn new(clusters: ClusterAccessor<'a>, runs: Vec<Run>) -> Self {
        let cluster_size = clusters.cluster_size() as u64;
        let len = runs.iter().map(|r| r.cluster_count * cluster_size).sum();
        NonResidentView { clusters, runs, len }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Locates the run containing byte offset `pos` (which must be `< len()`),
    /// returning (run index, byte offset from the start of that run).
    fn locate(&self, pos: u64) -> Option<(usize, u64)> {
        let cluster_size = self.clusters.cluster_size() as u64;
        let mut run_start = 0u64;
        for (i, run) in self.runs.iter().enumerate() {
            let run_len = run.cluster_count * cluster_size;
            if pos < run_start + run_len {
                return Some((i, pos - run_start));
            }
            run_start += run_len;
        }
        None
    }

    pub fn byte_at(&self, pos: u64) -> Result<u8> {
        Ok(self.slice(pos, pos + 1)?[0])
    }

    /// Returns the bytes in `[lo, hi)`. Concatenates a head fragment, any
    /// whole runs in between, and a tail fragment, in one pass.
    pub fn slice(&self, lo: u64, hi: u64) -> Result<Vec<u8>> {
        if lo > hi || hi > self.len {
            return Err(NtfsError::overrun(lo, (hi.saturating_sub(lo)) as usize, self.len as usize));
        }
        if lo == hi {
            return Ok(Vec::new());
        }

        let cluster_size = self.clusters.cluster_size() as u64;
        let (start_run, start_off) = self.locate(lo).expect("lo < len implies a containing run");
        let mut out = Vec::with_capacity((hi - lo) as usize);
        let mut remaining = hi - lo;
        let mut run_idx = start_run;
        let mut intra_offset = start_off;

        while remaining > 0 {
            let run = &self.runs[run_idx];
            let run_len = run.cluster_count * cluster_size;
            let take = remaining.min(run_len - intra_offset);

            match run.lcn {
                None => out.extend(std::iter::repeat(0u8).take(take as usize)),
                Some(lcn) => {
                    let first_cluster = lcn + intra_offset / cluster_size;
                    let intra_cluster_off = intra_offset % cluster_size;
                    let mut taken = 0u64;
                    let mut cluster = first_cluster;
                    let mut in_cluster_off = intra_cluster_off;
                    while taken < take {
                        let bytes = self.clusters.cluster(cluster)?;
                        let chunk = (take - taken).min(cluster_size - in_cluster_off) as usize;
                        out.extend_from_slice(
                            &bytes[in_cluster_off as usize..in_cluster_off as usize + chunk],
                        );
                        taken += chunk as u64;
                        cluster += 1;
                        in_cluster_off = 0;
                    }
                }
            }

            remaining -= take;
            intra_offset += take;
            if intra_offset >= run_len {
                run_idx += 1;
                intra_offset = 0;
            }
        }

        Ok(out)
    }
}
