/// Schema element offered to [`ModelVisibilityFilter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelElement<'a> {
    EntitySet(&'a str),
    EntityType(&'a str),
    /// Property declared on an entity or complex type.
    Property { owner: &'a str, name: &'a str },
    Operation(&'a str),
}

/// Decides which model elements are exposed.
///
/// Implementations hold the next filter of the chain and usually delegate to it for
/// elements they have no opinion about.
pub trait ModelVisibilityFilter: Send + Sync {
    fn is_visible(&self, element: &ModelElement<'_>) -> bool;
}

/// Terminal filter: everything is visible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllVisible;

impl ModelVisibilityFilter for AllVisible {
    fn is_visible(&self, _element: &ModelElement<'_>) -> bool {
        true
    }
}
