//! Document sources
//!
//! - [`StaticSource`]: HTTP GET + HTML parse
//! - [`RenderSource`]: navigate a renderer, wait for content, read the DOM
//! - `ChromeRenderer` (feature `browser`): headless Chromium for `RenderSource`

mod render;
mod static_source;

#[cfg(feature = "browser")]
mod chrome;

pub use render::*;
pub use static_source::*;

#[cfg(feature = "browser")]
pub use chrome::*;
