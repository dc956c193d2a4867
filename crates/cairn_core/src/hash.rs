use std::fmt::Write;

use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use xxhash_rust::xxh3::Xxh3;

/// Cairn needs to use a hasher for generating request identifiers.
///
/// The hashes don't need to be incredibly fast, but they should be stable across
/// runs, machines, platforms and versions, since they end up as keys in the on-disk cache.
pub type IdentifierHasher = Xxh3;

/// Collision resistant digest of arbitrary content, hex encoded.
///
/// Used wherever a hash decides whether a cached result may be served: file contents, results
/// and cache keys. Identifiers that only need to be stable use [`IdentifierHasher`].
pub fn content_hash(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// Hash a JSON value independent of the key order of its objects
pub fn hash_json(value: &Value) -> String {
  content_hash(canonical_json(value).as_bytes())
}

/// Serialize a JSON value with object keys sorted, so that equal values always produce equal text
pub fn canonical_json(value: &Value) -> String {
  let mut output = String::new();
  write_canonical(value, &mut output);
  output
}

fn write_canonical(value: &Value, output: &mut String) {
  match value {
    Value::Object(map) => {
      let mut keys = map.keys().collect::<Vec<_>>();
      keys.sort();

      output.push('{');
      for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
          output.push(',');
        }
        write_canonical(&Value::String(key.clone()), output);
        output.push(':');
        write_canonical(&map[key], output);
      }
      output.push('}');
    }
    Value::Array(items) => {
      output.push('[');
      for (index, item) in items.iter().enumerate() {
        if index > 0 {
          output.push(',');
        }
        write_canonical(item, output);
      }
      output.push(']');
    }
    scalar => {
      // Scalars have a single textual form
      let _ = write!(output, "{}", scalar);
    }
  }
}

/// Incrementally builds a content key out of a sequence of fields.
///
/// Every field is length-prefixed so that `("ab", "c")` and `("a", "bc")` never collide.
#[derive(Default)]
pub struct ContentKeyHasher {
  hasher: Sha256,
}

impl ContentKeyHasher {
  pub fn write_bytes(&mut self, bytes: &[u8]) {
    self.hasher.update((bytes.len() as u64).to_le_bytes());
    self.hasher.update(bytes);
  }

  pub fn write_str(&mut self, value: &str) {
    self.write_bytes(value.as_bytes());
  }

  pub fn write_optional(&mut self, value: Option<&str>) {
    match value {
      Some(value) => {
        self.write_bytes(&[1]);
        self.write_str(value);
      }
      None => self.write_bytes(&[0]),
    }
  }

  pub fn finish(self) -> String {
    hex::encode(self.hasher.finalize())
  }
}
