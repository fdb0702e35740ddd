//! Resizable images that are not yet part of the document.
//!
//! An inserted image lives here as an [`ImageDescriptor`] while the user
//! resizes it. Nothing reaches the editing surface until the descriptor is
//! committed, at which point [`ImageDescriptor::to_markup`] is inserted at
//! the cursor and the descriptor is dropped.

use crate::error::PagesmithError;
use crate::markup::escape_html;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub id: String,
    /// Image reference: a local reference, a `data:` URI or a URL.
    pub source: String,
    /// Display width in CSS pixels.
    pub width: u32,
    /// Display height in CSS pixels.
    pub height: u32,
}

impl ImageDescriptor {
    /// The `img` element committed into the document.
    pub fn to_markup(&self) -> String {
        format!(
            r#"<img src="{}" width="{}" height="{}" data-image-id="{}">"#,
            escape_html(&self.source),
            self.width,
            self.height,
            escape_html(&self.id)
        )
    }
}

/// Descriptors held by one session, in insertion order.
#[derive(Debug, Default)]
pub struct ImageSet {
    items: Vec<ImageDescriptor>,
    next_id: usize,
}

fn check_size(width: u32, height: u32) -> Result<(), PagesmithError> {
    if width == 0 || height == 0 {
        return Err(PagesmithError::InvalidImageSize { width, height });
    }
    Ok(())
}

impl ImageSet {
    pub fn add(
        &mut self,
        source: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<ImageDescriptor, PagesmithError> {
        check_size(width, height)?;
        self.next_id += 1;
        let descriptor = ImageDescriptor {
            id: format!("img-{}", self.next_id),
            source: source.into(),
            width,
            height,
        };
        self.items.push(descriptor.clone());
        Ok(descriptor)
    }

    pub fn resize(
        &mut self,
        id: &str,
        width: u32,
        height: u32,
    ) -> Result<ImageDescriptor, PagesmithError> {
        check_size(width, height)?;
        let item = self
            .items
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| PagesmithError::ImageNotFound { id: id.to_string() })?;
        item.width = width;
        item.height = height;
        Ok(item.clone())
    }

    pub fn remove(&mut self, id: &str) -> Result<ImageDescriptor, PagesmithError> {
        let pos = self
            .items
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| PagesmithError::ImageNotFound { id: id.to_string() })?;
        Ok(self.items.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&ImageDescriptor> {
        self.items.iter().find(|d| d.id == id)
    }

    pub fn list(&self) -> Vec<ImageDescriptor> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let mut set = ImageSet::default();
        let a = set.add("file:///a.png", 10, 10).unwrap();
        set.remove(&a.id).unwrap();
        let b = set.add("file:///b.png", 10, 10).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn resize_updates_in_place() {
        let mut set = ImageSet::default();
        let a = set.add("logo.png", 100, 50).unwrap();
        let resized = set.resize(&a.id, 200, 100).unwrap();
        assert_eq!((resized.width, resized.height), (200, 100));
        assert_eq!(set.get(&a.id), Some(&resized));
    }

    #[test]
    fn unknown_ids_and_zero_sizes_are_rejected() {
        let mut set = ImageSet::default();
        assert!(matches!(
            set.resize("img-9", 1, 1),
            Err(PagesmithError::ImageNotFound { .. })
        ));
        assert!(matches!(
            set.remove("img-9"),
            Err(PagesmithError::ImageNotFound { .. })
        ));
        assert!(matches!(
            set.add("x.png", 0, 10),
            Err(PagesmithError::InvalidImageSize { width: 0, height: 10 })
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn markup_escapes_the_source() {
        let d = ImageDescriptor {
            id: "img-1".into(),
            source: r#"a"b.png"#.into(),
            width: 3,
            height: 4,
        };
        assert_eq!(
            d.to_markup(),
            r#"<img src="a&quot;b.png" width="3" height="4" data-image-id="img-1">"#
        );
    }
}
