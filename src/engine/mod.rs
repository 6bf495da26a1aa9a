mod port;
mod runner;
mod stage;

use std::any::{Any, type_name};
use std::sync::Arc;

pub use crate::engine::port::Port;

pub(crate) use crate::engine::runner::run_parallel;
pub(crate) use crate::engine::stage::{JoinNode, SourceNode, Stage, StageNode};

use crate::error::Error;

/// Stable string key naming a stage within a single pipeline.
pub type Key = Arc<str>;

/// A type-erased, thread-safe container for stage outputs.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// A trait that enables one or more [`Port`]s to be used as the inputs of a
/// stage.
///
/// This trait is implemented for `()`, for a single `Port<T>`, for tuples
/// of ports, and for `Vec<Port<T>>`. It provides the logic the engine needs
/// to extract the upstream keys and to resolve the erased upstream outputs
/// into concrete references.
///
/// The declared input types of the stage computation must match, position
/// by position, the output types of the supplied ports; the compiler
/// enforces this through `Output`.
pub trait Inputs: Send + Sync + 'static {
    /// The resulting type once all inputs are resolved. For a tuple of
    /// `Port<T>`s this is a tuple of `&'a T`s.
    type Output<'a>;

    /// Upstream keys, in declaration order. Multiplicity is preserved: a
    /// stage may depend on the same upstream more than once.
    fn keys(&self) -> Vec<Key>;

    /// Resolves a slice of type-erased upstream outputs into the concrete
    /// `Output` type. The slice is positionally aligned with [`keys`].
    ///
    /// [`keys`]: Inputs::keys
    fn resolve<'a>(&self, values: &'a [Dynamic]) -> Result<Self::Output<'a>, Error>;
}

/// Reifies an erased value to `&T`, surfacing a [`Error::TypeMismatch`]
/// naming the producing stage when the types disagree.
pub(crate) fn reify<'a, T: Send + Sync + 'static>(
    key: &Key,
    value: &'a Dynamic,
) -> Result<&'a T, Error> {
    value.downcast_ref::<T>().ok_or_else(|| Error::TypeMismatch {
        key: key.clone(),
        expected: type_name::<T>(),
    })
}

impl Inputs for () {
    type Output<'a> = ();

    fn keys(&self) -> Vec<Key> {
        vec![]
    }

    fn resolve<'a>(&self, _: &'a [Dynamic]) -> Result<Self::Output<'a>, Error> {
        Ok(())
    }
}

impl<T> Inputs for Port<T>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = &'a T;

    fn keys(&self) -> Vec<Key> {
        vec![self.key.clone()]
    }

    fn resolve<'a>(&self, values: &'a [Dynamic]) -> Result<Self::Output<'a>, Error> {
        reify(&self.key, &values[0])
    }
}

impl<T> Inputs for Vec<Port<T>>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = Vec<&'a T>;

    fn keys(&self) -> Vec<Key> {
        self.iter().map(|port| port.key.clone()).collect()
    }

    fn resolve<'a>(&self, values: &'a [Dynamic]) -> Result<Self::Output<'a>, Error> {
        let mut result = Vec::with_capacity(self.len());

        for (port, value) in self.iter().zip(values) {
            result.push(reify(&port.key, value)?);
        }

        Ok(result)
    }
}

macro_rules! impl_inputs {
    ($($P:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($P),*> Inputs for ($(Port<$P>,)*)
        where
            $($P: Send + Sync + 'static),* {
            type Output<'a> = ($(&'a $P,)*);

            fn keys(&self) -> Vec<Key> {
                let ($($P,)*) = self;
                vec![$($P.key.clone(),)*]
            }

            fn resolve<'a>(&self, values: &'a [Dynamic]) -> Result<Self::Output<'a>, Error> {
                let ($($P,)*) = self;

                let mut iter = values.iter();

                Ok(($({
                    // The slice is built from our own keys(), so the
                    // lengths always agree.
                    let value = iter.next().unwrap();
                    reify::<$P>(&$P.key, value)?
                },)*))
            }
        }
    };
}

impl_inputs!(A);
impl_inputs!(A, B);
impl_inputs!(A, B, C);
impl_inputs!(A, B, C, D);
impl_inputs!(A, B, C, D, E);
impl_inputs!(A, B, C, D, E, F);
impl_inputs!(A, B, C, D, E, F, G);
impl_inputs!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    fn erase<T: Send + Sync + 'static>(value: T) -> Dynamic {
        Arc::new(value)
    }

    #[test]
    fn test_resolve_single() {
        let port = Port::<i32>::new(Arc::from("a"));
        let values = vec![erase(7i32)];

        let resolved = port.resolve(&values).unwrap();
        assert_eq!(*resolved, 7);
    }

    #[test]
    fn test_resolve_tuple() {
        let pack = (
            Port::<i32>::new(Arc::from("a")),
            Port::<String>::new(Arc::from("b")),
        );
        let values = vec![erase(7i32), erase(String::from("seven"))];

        let (a, b) = pack.resolve(&values).unwrap();
        assert_eq!(*a, 7);
        assert_eq!(b, "seven");
    }

    #[test]
    fn test_resolve_vec() {
        let pack = vec![
            Port::<i32>::new(Arc::from("a")),
            Port::<i32>::new(Arc::from("b")),
        ];
        let values = vec![erase(1i32), erase(2i32)];

        let resolved = pack.resolve(&values).unwrap();
        assert_eq!(resolved, vec![&1, &2]);
    }

    #[test]
    fn test_resolve_type_mismatch() {
        let port = Port::<String>::new(Arc::from("a"));
        let values = vec![erase(7i32)];

        let error = port.resolve(&values).unwrap_err();
        assert_eq!(error.name(), "TypeMismatch");
    }

    #[test]
    fn test_keys_preserve_order_and_multiplicity() {
        let a = Port::<i32>::new(Arc::from("a"));
        let pack = (a.clone(), Port::<i32>::new(Arc::from("b")), a);

        let keys: Vec<_> = pack.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["a", "b", "a"]);
    }
}
