//! Page-grained LRU block store.
//!
//! The store manages whole pages as its unit of insertion and recency, while
//! hit/miss accounting happens per block inside each page. Blocks remember
//! whether a prefetch brought them in and how often they were read, which
//! feeds the evicted-unused counter when their page is dropped.

use super::RequestError;
use crate::config::{CacheParams, ConfigError};
use crate::request::Request;
use stats::Response;
use std::collections::HashMap;
use std::num::NonZeroUsize;

#[derive(Debug, Default, Clone, Copy)]
struct Block {
    from_predictor: bool,
    num_reads: u32,
}

type PageBlocks = HashMap<u32, Block>;

/// One page's worth of a request: the page id plus the covered block range
/// normalized to in-page indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageView {
    id: u64,
    first_block: u32,
    num_blocks: u32,
}

/// Iterator over the pages covered by a block range.
#[derive(Debug, Clone, Copy)]
struct PageSpan {
    begin: u64,
    end: u64,
    blocks_per_page: u64,
}

impl PageSpan {
    fn new(params: &CacheParams, request: &Request) -> Self {
        Self {
            begin: request.addr / params.block_size,
            end: (request.addr + request.size) / params.block_size,
            blocks_per_page: params.page_size / params.block_size,
        }
    }
}

impl Iterator for PageSpan {
    type Item = PageView;

    fn next(&mut self) -> Option<PageView> {
        if self.begin >= self.end {
            return None;
        }
        let id = self.begin / self.blocks_per_page;
        let page_first = id * self.blocks_per_page;
        let page_last = page_first + self.blocks_per_page;
        let start_in_page = self.begin - page_first;
        let end_in_page = if page_first < self.end && self.end < page_last {
            self.end - page_first
        } else {
            self.blocks_per_page
        };
        self.begin = page_first + end_in_page;
        Some(PageView {
            id,
            first_block: start_in_page as u32,
            num_blocks: (end_in_page - start_in_page) as u32,
        })
    }
}

pub struct LruStore {
    pages: lru::LruCache<u64, PageBlocks>,
    params: CacheParams,
}

impl LruStore {
    pub fn new(params: &CacheParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let capacity = NonZeroUsize::new((params.cache_size / params.page_size) as usize)
            .expect("validated cache holds at least one page");
        log::debug!(
            "lru store: {} pages of {} blocks",
            capacity,
            params.page_size / params.block_size,
        );
        Ok(Self {
            pages: lru::LruCache::new(capacity),
            params: *params,
        })
    }

    fn verify(&self, request: &Request) -> Result<(), RequestError> {
        if request.size % self.params.block_size != 0 {
            return Err(RequestError::MisalignedSize {
                size: request.size,
                block_size: self.params.block_size,
            });
        }
        if request.addr % self.params.block_size != 0 {
            return Err(RequestError::MisalignedAddr {
                addr: request.addr,
                block_size: self.params.block_size,
            });
        }
        Ok(())
    }

    /// Fetch a page, inserting it empty on miss. Eviction charges blocks
    /// that a prefetch inserted and nothing ever read.
    fn fetch_page(&mut self, id: u64, response: &mut Response) -> &mut PageBlocks {
        if !self.pages.contains(&id) {
            if let Some((evicted_id, evicted)) = self.pages.push(id, PageBlocks::new()) {
                debug_assert_ne!(evicted_id, id);
                let unused = evicted
                    .values()
                    .filter(|block| block.from_predictor && block.num_reads == 0)
                    .count();
                response.evicted_unused += unused as u32;
                log::trace!("evicted page {evicted_id} ({unused} unused prefetched blocks)");
            }
        }
        self.pages.get_mut(&id).expect("page was just ensured")
    }

    /// Per-block accounting: present blocks count as hits and bump their
    /// read counter, absent blocks count as misses and are inserted as
    /// demand-fetched.
    pub fn read(&mut self, request: &Request) -> Result<Response, RequestError> {
        self.verify(request)?;
        let mut response = Response::default();
        for page in PageSpan::new(&self.params, request) {
            let blocks = self.fetch_page(page.id, &mut response);
            for block in page.first_block..page.first_block + page.num_blocks {
                match blocks.entry(block) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        response.hits += 1;
                        entry.get_mut().num_reads += 1;
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        response.misses += 1;
                        entry.insert(Block::default());
                    }
                }
            }
        }
        Ok(response)
    }

    /// Insert missing blocks as demand-written; no hit/miss accounting.
    pub fn write(&mut self, request: &Request) -> Result<Response, RequestError> {
        self.verify(request)?;
        let mut response = Response::default();
        for page in PageSpan::new(&self.params, request) {
            let blocks = self.fetch_page(page.id, &mut response);
            for block in page.first_block..page.first_block + page.num_blocks {
                blocks.entry(block).or_default();
            }
        }
        Ok(response)
    }

    /// Insert missing blocks as predictor-fetched and count them.
    pub fn prefetch(&mut self, request: &Request) -> Result<Response, RequestError> {
        self.verify(request)?;
        let mut response = Response::default();
        for page in PageSpan::new(&self.params, request) {
            let blocks = self.fetch_page(page.id, &mut response);
            for block in page.first_block..page.first_block + page.num_blocks {
                if let std::collections::hash_map::Entry::Vacant(entry) = blocks.entry(block) {
                    response.prefetched += 1;
                    entry.insert(Block {
                        from_predictor: true,
                        num_reads: 0,
                    });
                }
            }
        }
        Ok(response)
    }
}
