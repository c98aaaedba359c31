//! Call shapes on both sides of an intercepted call.
//!
//! Arguments arrive as a single entity, a collection, or a bare string;
//! results come back as an object, an option, a collection, a page, or a
//! lazy iterable.  Results are normalized to a flat element list for
//! transformation and re-wrapped into the original container afterwards.
//!
//! Lazy iterables are materialized at the boundary: true streaming is
//! sacrificed so the quarantine step can run before any field mutation.

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arguments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the intercepted call sits in the host application.
///
/// A bare string argument is only encrypted from a repository-style caller;
/// from a service-style caller its policy is ambiguous, and transforming it
/// would risk double encryption further down the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    Repository,
    Service,
}

/// The argument of an intercepted write-leaning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercepted<E> {
    Entity(E),
    Entities(Vec<E>),
    Value(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Paged container
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Paging coordinates of a [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub number: u64,
    pub size: u64,
}

/// A paged result container.  Rebuilt fresh from `(content, info, total)`
/// after transformation, the same way the host's paged type would be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<E> {
    pub content: Vec<E>,
    pub info: PageInfo,
    pub total: u64,
}

impl<E> Page<E> {
    pub fn new(content: Vec<E>, info: PageInfo, total: u64) -> Self {
        Self {
            content,
            info,
            total,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The result of an intercepted read-leaning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult<E> {
    One(E),
    Maybe(Option<E>),
    Many(Vec<E>),
    Paged(Page<E>),
    /// A lazy iterable, already materialized to an in-memory sequence.
    Stream(Vec<E>),
}

/// Container shape retained across decomposition so the transformed
/// elements re-wrap into what the caller handed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResultShape {
    One,
    Maybe,
    Many,
    Paged { info: PageInfo, total: u64 },
    Stream,
}

impl<E> CallResult<E> {
    /// Flatten into `(elements, shape)`.
    pub(crate) fn decompose(self) -> (Vec<E>, ResultShape) {
        match self {
            CallResult::One(e) => (vec![e], ResultShape::One),
            CallResult::Maybe(opt) => (opt.into_iter().collect(), ResultShape::Maybe),
            CallResult::Many(v) => (v, ResultShape::Many),
            CallResult::Paged(page) => (
                page.content,
                ResultShape::Paged {
                    info: page.info,
                    total: page.total,
                },
            ),
            CallResult::Stream(v) => (v, ResultShape::Stream),
        }
    }

    /// Re-wrap transformed elements into the retained shape.  Element count
    /// is preserved by the transformation, so the shape always fits.
    pub(crate) fn rebuild(shape: ResultShape, mut elements: Vec<E>) -> Self {
        match shape {
            ResultShape::One => {
                debug_assert_eq!(elements.len(), 1);
                CallResult::One(elements.remove(0))
            }
            ResultShape::Maybe => CallResult::Maybe(elements.pop()),
            ResultShape::Many => CallResult::Many(elements),
            ResultShape::Paged { info, total } => {
                CallResult::Paged(Page::new(elements, info, total))
            }
            ResultShape::Stream => CallResult::Stream(elements),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_round_trips() {
        let (elements, shape) = CallResult::One(7).decompose();
        assert_eq!(elements, vec![7]);
        assert_eq!(CallResult::rebuild(shape, elements), CallResult::One(7));
    }

    #[test]
    fn maybe_round_trips_both_ways() {
        let (elements, shape) = CallResult::<u32>::Maybe(None).decompose();
        assert!(elements.is_empty());
        assert_eq!(
            CallResult::<u32>::rebuild(shape, elements),
            CallResult::Maybe(None)
        );

        let (elements, shape) = CallResult::Maybe(Some(3)).decompose();
        assert_eq!(CallResult::rebuild(shape, elements), CallResult::Maybe(Some(3)));
    }

    #[test]
    fn page_round_trips_with_paging_info() {
        let page = Page::new(vec![1, 2, 3], PageInfo { number: 2, size: 3 }, 42);
        let (elements, shape) = CallResult::Paged(page).decompose();
        assert_eq!(elements, vec![1, 2, 3]);

        let rebuilt = CallResult::rebuild(shape, elements);
        let CallResult::Paged(page) = rebuilt else {
            panic!("expected paged result");
        };
        assert_eq!(page.info, PageInfo { number: 2, size: 3 });
        assert_eq!(page.total, 42);
    }

    #[test]
    fn stream_stays_materialized() {
        let (elements, shape) = CallResult::Stream(vec![1, 2]).decompose();
        assert_eq!(
            CallResult::rebuild(shape, elements),
            CallResult::Stream(vec![1, 2])
        );
    }
}
