//! Topic and event type definitions.
//!
//! Every domain change travels on the topic named after its entity, and every
//! event type is spelled `"<entity>.<action>"`. The entity prefix alone decides
//! the topic, so a producer can introduce a new action for a known entity
//! without touching this module; consumers that don't recognize the action
//! simply skip it.
//!
//! # Example
//!
//! ```
//! use relay_core::topic::{EventType, Topic};
//!
//! assert_eq!(EventType::ProductOutOfStock.as_str(), "product.out_of_stock");
//! assert_eq!(EventType::ProductOutOfStock.topic(), Topic::Product);
//! assert_eq!(Topic::for_event_type("user.verified"), Some(Topic::User));
//! assert_eq!(EventType::parse("user.verified"), None);
//! ```

use std::fmt;

/// Bus topics, one per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `user`
    User,
    /// `order`
    Order,
    /// `post`
    Post,
    /// `product`
    Product,
    /// `supplier`
    Supplier,
}

impl Topic {
    /// Every known topic, in subscription order.
    pub const ALL: [Self; 5] = [
        Self::User,
        Self::Order,
        Self::Post,
        Self::Product,
        Self::Supplier,
    ];

    /// Topic name on the bus.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Order => "order",
            Self::Post => "post",
            Self::Product => "product",
            Self::Supplier => "supplier",
        }
    }

    /// Parse a topic name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == name)
    }

    /// Derive the topic from an event type's entity prefix.
    ///
    /// Only the part before the first `.` is inspected, so unrecognized
    /// actions on a known entity still resolve.
    #[must_use]
    pub fn for_event_type(event_type: &str) -> Option<Self> {
        let (entity, action) = event_type.split_once('.')?;
        if action.is_empty() {
            return None;
        }
        Self::parse(entity)
    }

    /// Names of every known topic.
    #[must_use]
    pub fn all_names() -> Vec<String> {
        Self::ALL.iter().map(|t| t.as_str().to_string()).collect()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event types the relay knows how to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// `user.created`
    UserCreated,
    /// `user.updated`
    UserUpdated,
    /// `user.deleted` (soft delete)
    UserDeleted,

    /// `supplier.created`
    SupplierCreated,
    /// `supplier.updated`
    SupplierUpdated,
    /// `supplier.deleted` (hard delete)
    SupplierDeleted,

    /// `product.created`
    ProductCreated,
    /// `product.updated`
    ProductUpdated,
    /// `product.published`
    ProductPublished,
    /// `product.discontinued`
    ProductDiscontinued,
    /// `product.out_of_stock`
    ProductOutOfStock,
    /// `product.restored`
    ProductRestored,
    /// `product.deleted` (hard delete, variants cascade)
    ProductDeleted,

    /// `order.created`
    OrderCreated,
    /// `order.cancelled` (payload carries only `order_number`)
    OrderCancelled,

    /// `post.created`
    PostCreated,
    /// `post.updated`
    PostUpdated,
    /// `post.published`
    PostPublished,
    /// `post.deleted` (soft delete)
    PostDeleted,
}

impl EventType {
    /// Every known event type.
    pub const ALL: [Self; 19] = [
        Self::UserCreated,
        Self::UserUpdated,
        Self::UserDeleted,
        Self::SupplierCreated,
        Self::SupplierUpdated,
        Self::SupplierDeleted,
        Self::ProductCreated,
        Self::ProductUpdated,
        Self::ProductPublished,
        Self::ProductDiscontinued,
        Self::ProductOutOfStock,
        Self::ProductRestored,
        Self::ProductDeleted,
        Self::OrderCreated,
        Self::OrderCancelled,
        Self::PostCreated,
        Self::PostUpdated,
        Self::PostPublished,
        Self::PostDeleted,
    ];

    /// Wire spelling, `"<entity>.<action>"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserDeleted => "user.deleted",
            Self::SupplierCreated => "supplier.created",
            Self::SupplierUpdated => "supplier.updated",
            Self::SupplierDeleted => "supplier.deleted",
            Self::ProductCreated => "product.created",
            Self::ProductUpdated => "product.updated",
            Self::ProductPublished => "product.published",
            Self::ProductDiscontinued => "product.discontinued",
            Self::ProductOutOfStock => "product.out_of_stock",
            Self::ProductRestored => "product.restored",
            Self::ProductDeleted => "product.deleted",
            Self::OrderCreated => "order.created",
            Self::OrderCancelled => "order.cancelled",
            Self::PostCreated => "post.created",
            Self::PostUpdated => "post.updated",
            Self::PostPublished => "post.published",
            Self::PostDeleted => "post.deleted",
        }
    }

    /// Parse a wire event type.
    ///
    /// Returns `None` for anything unrecognized. That is not an error: newer
    /// producers may emit types this build has never heard of.
    #[must_use]
    pub fn parse(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == event_type)
    }

    /// The topic this event type is published on.
    #[must_use]
    pub const fn topic(self) -> Topic {
        match self {
            Self::UserCreated | Self::UserUpdated | Self::UserDeleted => Topic::User,
            Self::SupplierCreated | Self::SupplierUpdated | Self::SupplierDeleted => {
                Topic::Supplier
            }
            Self::ProductCreated
            | Self::ProductUpdated
            | Self::ProductPublished
            | Self::ProductDiscontinued
            | Self::ProductOutOfStock
            | Self::ProductRestored
            | Self::ProductDeleted => Topic::Product,
            Self::OrderCreated | Self::OrderCancelled => Topic::Order,
            Self::PostCreated | Self::PostUpdated | Self::PostPublished | Self::PostDeleted => {
                Topic::Post
            }
        }
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_lives_on_its_prefix_topic() {
        for event_type in EventType::ALL {
            assert_eq!(
                Topic::for_event_type(event_type.as_str()),
                Some(event_type.topic()),
                "{event_type} is published on the wrong topic"
            );
        }
    }

    #[test]
    fn parse_recognizes_every_wire_name() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn unknown_actions_are_not_event_types_but_still_route() {
        assert_eq!(EventType::parse("order.refunded"), None);
        assert_eq!(Topic::for_event_type("order.refunded"), Some(Topic::Order));
    }

    #[test]
    fn malformed_event_types_have_no_topic() {
        assert_eq!(Topic::for_event_type("user"), None);
        assert_eq!(Topic::for_event_type("user."), None);
        assert_eq!(Topic::for_event_type("invoice.created"), None);
        assert_eq!(Topic::for_event_type(""), None);
    }

    #[test]
    fn all_names_covers_every_topic() {
        assert_eq!(
            Topic::all_names(),
            vec!["user", "order", "post", "product", "supplier"]
        );
    }
}
