// Work Item Generators
// Lazy, resumable producers of work items. A generator is either pointwise
// (item i is a pure function of i) or a custom stream that knows how to
// resume itself at an offset.

use anyhow::Result;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::HarnessError;

const CHARACTERS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Produces item `i` directly from its index
pub trait PointwiseGenerator: Send + Sync + 'static {
    type Item: Send + 'static;

    fn invoke(&self, index: u64) -> Result<Self::Item>;
}

/// Produces a whole stream starting at an offset
///
/// Implementations must skip to `start_at` without materialising earlier items.
pub trait FlowGenerator: Send + Sync + 'static {
    type Item: Send + 'static;

    fn produce(&self, start_at: u64) -> BoxStream<'static, Result<Self::Item>>;
}

/// The closed set of generator shapes the runner accepts
pub enum Generator<T> {
    Pointwise(Arc<dyn PointwiseGenerator<Item = T>>),
    Custom(Arc<dyn FlowGenerator<Item = T>>),
}

impl<T> Clone for Generator<T> {
    fn clone(&self) -> Self {
        match self {
            Generator::Pointwise(g) => Generator::Pointwise(Arc::clone(g)),
            Generator::Custom(g) => Generator::Custom(Arc::clone(g)),
        }
    }
}

impl<T: Send + 'static> Generator<T> {
    pub fn pointwise(generator: impl PointwiseGenerator<Item = T>) -> Self {
        Generator::Pointwise(Arc::new(generator))
    }

    pub fn custom(generator: impl FlowGenerator<Item = T>) -> Self {
        Generator::Custom(Arc::new(generator))
    }

    /// Lazy, unbounded stream of items beginning at `start_at`
    ///
    /// A pointwise generator that fails on some index ends its stream with a
    /// generation error for that index.
    pub fn produce(&self, start_at: u64) -> BoxStream<'static, Result<T>> {
        match self {
            Generator::Pointwise(generator) => {
                let generator = Arc::clone(generator);
                stream::iter(start_at..)
                    .scan(false, move |failed, index| {
                        if *failed {
                            return future::ready(None);
                        }
                        let item = generator.invoke(index).map_err(|source| {
                            anyhow::Error::new(HarnessError::Generation { index, source })
                        });
                        *failed = item.is_err();
                        future::ready(Some(item))
                    })
                    .boxed()
            }
            Generator::Custom(generator) => generator.produce(start_at),
        }
    }
}

/// Yields its own index: 0, 1, 2, ...
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterGenerator;

impl PointwiseGenerator for CounterGenerator {
    type Item = u64;

    fn invoke(&self, index: u64) -> Result<u64> {
        Ok(index)
    }
}

/// Alphanumeric strings of a fixed length
///
/// With a seed, item `i` is always the same string, so runs can be resumed
/// and replayed. Without one every call draws fresh randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomStringGenerator {
    pub length: usize,
    pub seed: Option<u64>,
}

impl RandomStringGenerator {
    pub fn new(length: usize) -> Self {
        Self { length, seed: None }
    }

    pub fn seeded(length: usize, seed: u64) -> Self {
        Self {
            length,
            seed: Some(seed),
        }
    }
}

fn next_string(rng: &mut impl Rng, length: usize) -> String {
    (0..length)
        .map(|_| CHARACTERS[rng.gen_range(0..CHARACTERS.len())] as char)
        .collect()
}

impl PointwiseGenerator for RandomStringGenerator {
    type Item = String;

    fn invoke(&self, index: u64) -> Result<String> {
        match self.seed {
            Some(seed) => {
                let mut rng =
                    StdRng::seed_from_u64(seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                Ok(next_string(&mut rng, self.length))
            }
            None => Ok(next_string(&mut rand::thread_rng(), self.length)),
        }
    }
}

/// Serialisable description of a generator, recorded with the test definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GeneratorSpec {
    Counter,
    RandomString { length: usize, seed: Option<u64> },
}

impl GeneratorSpec {
    /// Build a generator that renders every item as text
    pub fn text_generator(&self) -> Generator<String> {
        match self {
            GeneratorSpec::Counter => Generator::pointwise(CounterText),
            GeneratorSpec::RandomString { length, seed } => {
                Generator::pointwise(RandomStringGenerator {
                    length: *length,
                    seed: *seed,
                })
            }
        }
    }
}

/// Counter rendered as decimal text
#[derive(Debug, Clone, Copy)]
struct CounterText;

impl PointwiseGenerator for CounterText {
    type Item = String;

    fn invoke(&self, index: u64) -> Result<String> {
        Ok(index.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use futures::TryStreamExt;

    struct FailsAt(u64);

    impl PointwiseGenerator for FailsAt {
        type Item = u64;

        fn invoke(&self, index: u64) -> Result<u64> {
            if index == self.0 {
                anyhow::bail!("exhausted");
            }
            Ok(index)
        }
    }

    struct Squares;

    impl FlowGenerator for Squares {
        type Item = u64;

        fn produce(&self, start_at: u64) -> BoxStream<'static, Result<u64>> {
            stream::iter(start_at..).map(|i| Ok(i * i)).boxed()
        }
    }

    #[tokio::test]
    async fn test_counter_resumes_at_offset() {
        let generator = Generator::pointwise(CounterGenerator);
        let items: Vec<u64> = generator.produce(5).take(3).try_collect().await.unwrap();
        assert_eq!(items, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn test_seeded_strings_are_restartable() {
        let generator = Generator::pointwise(RandomStringGenerator::seeded(12, 42));

        let full: Vec<String> = generator.produce(0).take(10).try_collect().await.unwrap();
        let resumed: Vec<String> = generator.produce(4).take(6).try_collect().await.unwrap();

        assert_eq!(&full[4..], resumed.as_slice());
        assert!(full.iter().all(|s| s.len() == 12));
        assert!(full
            .iter()
            .all(|s| s.bytes().all(|b| CHARACTERS.contains(&b))));
    }

    #[tokio::test]
    async fn test_unseeded_strings_have_requested_length() {
        let generator = Generator::pointwise(RandomStringGenerator::new(512));
        let items: Vec<String> = generator.produce(0).take(3).try_collect().await.unwrap();
        assert!(items.iter().all(|s| s.len() == 512));
    }

    #[tokio::test]
    async fn test_pointwise_failure_is_generation_error() {
        let generator = Generator::pointwise(FailsAt(2));
        let result: Result<Vec<u64>> = generator.produce(0).try_collect().await;

        let err = result.expect_err("generator should fail");
        match classify(&err) {
            Some(HarnessError::Generation { index, .. }) => assert_eq!(*index, 2),
            other => panic!("expected generation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_pointwise_generator_ends_stream() {
        let generator = Generator::pointwise(FailsAt(2));
        let items: Vec<Result<u64>> = generator.produce(0).collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &0);
        assert_eq!(items[1].as_ref().unwrap(), &1);
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_custom_generator() {
        let generator = Generator::custom(Squares);
        let items: Vec<u64> = generator.produce(3).take(2).try_collect().await.unwrap();
        assert_eq!(items, vec![9, 16]);
    }

    #[tokio::test]
    async fn test_described_text_generator() {
        let counter = GeneratorSpec::Counter.text_generator();
        let items: Vec<String> = counter.produce(7).take(2).try_collect().await.unwrap();
        assert_eq!(items, vec!["7".to_string(), "8".to_string()]);

        let spec = GeneratorSpec::RandomString {
            length: 4,
            seed: Some(1),
        };
        let a: Vec<String> = spec.text_generator().produce(0).take(2).try_collect().await.unwrap();
        let b: Vec<String> = spec.text_generator().produce(0).take(2).try_collect().await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generator_description_serialization() {
        let spec = GeneratorSpec::RandomString {
            length: 512,
            seed: None,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"type":"randomString","length":512,"seed":null}"#);
    }
}
