use crate::error::Error;
use crate::SyntheticRow;
use rand::distr::{Alphanumeric, Distribution};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Zipf;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Digits of the zero-padded index in a row key.
pub const KEY_DIGITS: usize = 7;

fn default_prefix() -> String {
    "perf".to_string()
}

fn default_column_family() -> String {
    "cf".to_string()
}

fn default_fields() -> usize {
    10
}

fn default_value_len() -> usize {
    100
}

fn default_pool_size() -> usize {
    1000
}

fn default_dist() -> String {
    "uniform".to_string()
}

/// The shape of generated rows, deserialized from the `[workload]` section.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct WorkloadOpt {
    /// Prefix of every row key. Keys look like `<prefix>0000042`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Column family all fields are written to.
    #[serde(default = "default_column_family")]
    pub column_family: String,

    /// Number of fields per row, named `field0`, `field1` and so on.
    ///
    /// Default: 10.
    #[serde(default = "default_fields")]
    pub fields: usize,

    /// Length of each field value in characters.
    ///
    /// Default: 100.
    #[serde(default = "default_value_len")]
    pub value_len: usize,

    /// Number of random values precomputed per generator.
    ///
    /// Default: 1000.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Size of the existing keyspace `[0, total_rows)`, used to pick keys in the mixed workload.
    ///
    /// Default: `total_rows` of `[load]`, if given.
    pub total_rows: Option<u64>,

    /// How the mixed workload picks row indices: "uniform" or "zipfian".
    #[serde(default = "default_dist")]
    pub dist: String,

    /// Exponent of the zipfian distribution. Default: 1.0.
    pub zipf_theta: Option<f64>,
}

impl Default for WorkloadOpt {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            column_family: default_column_family(),
            fields: default_fields(),
            value_len: default_value_len(),
            pool_size: default_pool_size(),
            total_rows: None,
            dist: default_dist(),
            zipf_theta: None,
        }
    }
}

impl WorkloadOpt {
    pub(crate) fn sanity(&self) -> Result<(), Error> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size should be positive".into()));
        }
        match self.dist.as_str() {
            "uniform" | "zipfian" => {}
            _ => {
                return Err(Error::Config(format!(
                    "invalid key distribution: {}",
                    self.dist
                )))
            }
        }
        Ok(())
    }
}

/// Format the key of the row at `index`.
pub fn row_key(prefix: &str, index: u64) -> String {
    format!("{}{:0width$}", prefix, index, width = KEY_DIGITS)
}

/// Generator of synthetic rows.
///
/// The value pool is filled once at construction. Generating a row only picks values from the
/// pool, so the cost of producing random strings never lands in a timed region.
#[derive(Debug)]
pub struct RowGenerator {
    prefix: String,
    family: Arc<str>,
    names: Vec<Arc<str>>,
    pool: Vec<Arc<str>>,
    rng: SmallRng,
}

impl RowGenerator {
    pub fn new(opt: &WorkloadOpt) -> Self {
        let mut rng = SmallRng::from_os_rng();
        let pool = (0..opt.pool_size.max(1))
            .map(|_| {
                let s: String = (&mut rng)
                    .sample_iter(Alphanumeric)
                    .take(opt.value_len)
                    .map(char::from)
                    .collect();
                Arc::from(s)
            })
            .collect();
        let names = (0..opt.fields)
            .map(|i| Arc::from(format!("field{}", i)))
            .collect();
        Self {
            prefix: opt.prefix.clone(),
            family: Arc::from(opt.column_family.as_str()),
            names,
            pool,
            rng,
        }
    }

    pub fn key(&self, index: u64) -> String {
        row_key(&self.prefix, index)
    }

    pub fn generate(&mut self, index: u64) -> SyntheticRow {
        let fields = self
            .names
            .iter()
            .map(|name| {
                let value = self.pool[self.rng.random_range(0..self.pool.len())].clone();
                (name.clone(), value)
            })
            .collect();
        SyntheticRow {
            key: self.key(index),
            family: self.family.clone(),
            fields,
        }
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }
}

/// The distribution of row indices in the mixed workload.
#[derive(Debug)]
pub(crate) enum KeyDistribution {
    Uniform,
    Zipfian(Zipf<f64>),
}

/// Picks row indices from `[0, max)`.
#[derive(Debug)]
pub(crate) struct KeyPicker {
    max: u64,
    dist: KeyDistribution,
}

impl KeyPicker {
    pub(crate) fn new(opt: &WorkloadOpt, max: u64) -> Result<Self, Error> {
        if max == 0 {
            return Err(Error::Config("total_rows should be positive".into()));
        }
        let dist = match opt.dist.as_str() {
            "uniform" => KeyDistribution::Uniform,
            "zipfian" => {
                let theta = opt.zipf_theta.unwrap_or(1.0f64);
                let zipf = Zipf::new(max as f64, theta)
                    .map_err(|e| Error::Config(format!("invalid zipfian parameters: {}", e)))?;
                KeyDistribution::Zipfian(zipf)
            }
            _ => {
                return Err(Error::Config(format!(
                    "invalid key distribution: {}",
                    opt.dist
                )))
            }
        };
        Ok(Self { max, dist })
    }

    pub(crate) fn next(&self, rng: &mut impl Rng) -> u64 {
        let index = match self.dist {
            KeyDistribution::Uniform => rng.random_range(0..self.max),
            // zipf starts at 1
            KeyDistribution::Zipfian(ref dist) => dist.sample(rng) as u64 - 1,
        };
        index.min(self.max - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::{HashMap, HashSet};

    #[test]
    fn key_is_zero_padded() {
        assert_eq!(row_key("perf", 0), "perf0000000");
        assert_eq!(row_key("perf", 42), "perf0000042");
        assert_eq!(row_key("", 1234567), "1234567");
        // wider indices are not truncated
        assert_eq!(row_key("k", 12345678), "k12345678");
    }

    #[test]
    fn generate_reference_shape() {
        let opt = WorkloadOpt::default();
        let mut gen = RowGenerator::new(&opt);
        assert_eq!(gen.pool_len(), 1000);
        let row = gen.generate(7);
        assert_eq!(row.key, "perf0000007");
        assert_eq!(&*row.family, "cf");
        assert_eq!(row.fields.len(), 10);
        for (i, (name, value)) in row.fields.iter().enumerate() {
            assert_eq!(&**name, format!("field{}", i));
            assert_eq!(value.len(), 100);
            assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn generate_key_is_stable() {
        let opt = WorkloadOpt {
            prefix: "user".to_string(),
            fields: 4,
            value_len: 8,
            pool_size: 16,
            ..Default::default()
        };
        let mut gen = RowGenerator::new(&opt);
        let a = gen.generate(99);
        for _ in 0..100 {
            let b = gen.generate(99);
            assert_eq!(a.key.as_bytes(), b.key.as_bytes());
            let names_a: Vec<_> = a.fields.iter().map(|(n, _)| n.clone()).collect();
            let names_b: Vec<_> = b.fields.iter().map(|(n, _)| n.clone()).collect();
            assert_eq!(names_a, names_b);
        }
    }

    #[test]
    fn values_come_from_pool() {
        let opt = WorkloadOpt {
            pool_size: 5,
            ..Default::default()
        };
        let mut gen = RowGenerator::new(&opt);
        let mut seen = HashSet::new();
        for i in 0..1000 {
            for (_, v) in gen.generate(i).fields {
                seen.insert(v);
            }
        }
        assert!(seen.len() <= 5);
        assert!(seen.len() > 1);
    }

    #[test]
    fn picker_uniform_covers_range() {
        let opt = WorkloadOpt::default();
        let picker = KeyPicker::new(&opt, 10).unwrap();
        let mut rng = rand::rng();
        let mut dist: HashMap<u64, u64> = HashMap::new();
        for _ in 0..100000 {
            let k = picker.next(&mut rng);
            assert!(k < 10);
            *dist.entry(k).or_insert(0) += 1;
        }
        assert_eq!(dist.len(), 10);
        for c in dist.values() {
            assert!(*c > 8000 && *c < 12000);
        }
    }

    #[test]
    fn picker_zipfian_is_skewed() {
        let opt = WorkloadOpt {
            dist: "zipfian".to_string(),
            ..Default::default()
        };
        let picker = KeyPicker::new(&opt, 10).unwrap();
        let mut rng = rand::rng();
        let mut freq = [0u64; 10];
        for _ in 0..100000 {
            freq[picker.next(&mut rng) as usize] += 1;
        }
        // with theta 1.0, key 0 is about twice as popular as key 1
        let p1 = freq[0] as f64 / freq[1] as f64;
        assert!(p1 > 1.8 && p1 < 2.2, "zipf p1: {}", p1);
    }

    #[test]
    fn picker_rejects_empty_keyspace() {
        let opt = WorkloadOpt::default();
        assert!(matches!(KeyPicker::new(&opt, 0), Err(Error::Config(_))));
    }

    #[test]
    fn invalid_distribution() {
        let opt = WorkloadOpt {
            dist: "gaussian".to_string(),
            ..Default::default()
        };
        assert!(matches!(opt.sanity(), Err(Error::Config(_))));
        assert!(KeyPicker::new(&opt, 10).is_err());
    }
}
