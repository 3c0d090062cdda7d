// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use provision_types::Container;

use crate::Result;

pub trait ImageOps: Send + Sync {
    /// Stream `uri` (http(s):// or file://) through the decompressor for
    /// `container` into `target`. Returns the number of bytes written.
    fn copy_image(&self, uri: &str, container: Container, target: &str) -> Result<u64>;

    /// Hex md5 over the first `size` bytes of `path`.
    fn calculate_md5(&self, path: &str, size: u64) -> Result<String>;

    /// Fetch a small text document (http(s):// or file://).
    fn fetch_text(&self, uri: &str) -> Result<String>;

    /// Copy the contents of `src` into `dst`, preserving hard links.
    fn sync_tree(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Pack `src` into `dst` using `container`.
    fn containerize(&self, src: &Path, container: Container, dst: &Path) -> Result<()>;
}
