//! Event identity and payload types.
//!
//! An event is named by an [`EventBase`] (its category) and an [`EventId`]
//! (which event within that category). Subscriptions may use the
//! [`ANY_BASE`] / [`ANY_ID`] wildcards as filters; published events never can.

use std::fmt;

use crate::error::{EventLoopError, Result};

/// Identifier of an event within its base.
pub type EventId = i32;

/// Wildcard id filter: matches every id of a base. Not publishable.
pub const ANY_ID: EventId = -1;

/// Wildcard base filter: matches every base. Not publishable, and only valid
/// together with [`ANY_ID`].
pub const ANY_BASE: EventBase = EventBase(None);

/// Named category of events.
///
/// Bases are compared by name, so two constants declared with the same
/// string in different modules refer to the same category.
///
/// ```
/// use evloop::EventBase;
///
/// pub const WIFI_EVENT: EventBase = EventBase::new("wifi");
/// assert_eq!(WIFI_EVENT.name(), Some("wifi"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventBase(Option<&'static str>);

impl EventBase {
    pub const fn new(name: &'static str) -> Self {
        EventBase(Some(name))
    }

    /// Name of the base, `None` for [`ANY_BASE`].
    pub const fn name(&self) -> Option<&'static str> {
        self.0
    }

    pub const fn is_any(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for EventBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for EventBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(name) => f.write_str(name),
            None => f.write_str("ANY_BASE"),
        }
    }
}

/// Display helper for ids that renders [`ANY_ID`] by name.
pub(crate) struct DisplayId(pub EventId);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == ANY_ID {
            f.write_str("ANY_ID")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Rejects the one illegal filter shape: `ANY_BASE` with a concrete id.
pub(crate) fn validate_filter(base: EventBase, id: EventId) -> Result<()> {
    if base.is_any() && id != ANY_ID {
        return Err(EventLoopError::invalid_arg(
            "ANY_BASE may only be combined with ANY_ID",
        ));
    }
    Ok(())
}

/// Rejects wildcard bases and ids on the publishing side.
pub(crate) fn validate_publishable(base: EventBase, id: EventId) -> Result<()> {
    if base.is_any() {
        return Err(EventLoopError::invalid_arg("cannot publish to ANY_BASE"));
    }
    if id == ANY_ID {
        return Err(EventLoopError::invalid_arg("cannot publish ANY_ID"));
    }
    Ok(())
}

/// Borrowed view of an event handed to callbacks during dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub base: EventBase,
    pub id: EventId,
    /// Copy of the bytes given to `publish`; `None` when no payload was given.
    pub data: Option<&'a [u8]>,
}

impl<'a> Event<'a> {
    /// Payload bytes, empty when the event carries none.
    pub fn bytes(&self) -> &'a [u8] {
        self.data.unwrap_or(&[])
    }
}

/// Event record owned by the queue between publish and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub base: EventBase,
    pub id: EventId,
    pub data: Option<Box<[u8]>>,
}

impl QueuedEvent {
    /// Builds a record with a private copy of `data`.
    ///
    /// An empty slice is stored as an absent payload.
    pub fn copy_from(base: EventBase, id: EventId, data: &[u8]) -> Result<Self> {
        let data = if data.is_empty() {
            None
        } else {
            let mut owned = Vec::new();
            owned
                .try_reserve_exact(data.len())
                .map_err(|_| EventLoopError::NoMemory { size: data.len() })?;
            owned.extend_from_slice(data);
            Some(owned.into_boxed_slice())
        };
        Ok(Self { base, id, data })
    }

    pub fn as_event(&self) -> Event<'_> {
        Event {
            base: self.base,
            id: self.id,
            data: self.data.as_deref(),
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE1: EventBase = EventBase::new("base1");

    #[test]
    fn test_any_base_display() {
        assert_eq!(ANY_BASE.to_string(), "ANY_BASE");
        assert_eq!(BASE1.to_string(), "base1");
        assert_eq!(DisplayId(ANY_ID).to_string(), "ANY_ID");
        assert_eq!(DisplayId(7).to_string(), "7");
    }

    #[test]
    fn test_bases_compare_by_name() {
        assert_eq!(BASE1, EventBase::new("base1"));
        assert_ne!(BASE1, ANY_BASE);
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_filter(ANY_BASE, ANY_ID).is_ok());
        assert!(validate_filter(BASE1, ANY_ID).is_ok());
        assert!(validate_filter(BASE1, 3).is_ok());
        assert!(matches!(
            validate_filter(ANY_BASE, 3),
            Err(EventLoopError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_publish_validation_rejects_wildcards() {
        assert!(validate_publishable(BASE1, 0).is_ok());
        assert!(validate_publishable(ANY_BASE, 0).is_err());
        assert!(validate_publishable(BASE1, ANY_ID).is_err());
        assert!(validate_publishable(ANY_BASE, ANY_ID).is_err());
    }

    #[test]
    fn test_copy_is_independent_of_source() {
        let mut buf = vec![1u8, 2, 3];
        let event = QueuedEvent::copy_from(BASE1, 0, &buf).unwrap();
        buf[0] = 42;
        drop(buf);
        assert_eq!(event.as_event().data, Some(&[1u8, 2, 3][..]));
        assert_eq!(event.len(), 3);
    }

    #[test]
    fn test_empty_payload_is_absent() {
        let event = QueuedEvent::copy_from(BASE1, 0, &[]).unwrap();
        assert!(event.is_empty());
        assert_eq!(event.as_event().data, None);
        assert!(event.as_event().bytes().is_empty());
    }

    #[test]
    fn test_single_zero_byte_is_present() {
        let event = QueuedEvent::copy_from(BASE1, 0, &[0]).unwrap();
        assert_eq!(event.as_event().data, Some(&[0u8][..]));
    }
}
