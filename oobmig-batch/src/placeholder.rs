use parking_lot::Mutex;
use std::{collections::HashMap, fmt::Write, sync::Arc};

/// Memoized `VALUES` placeholder lists.
///
/// Keyed by the row shape (the per-column casts) and the number of rows. One
/// cache is owned by each migrator and lent to every inserter it creates, so
/// nothing is shared between unrelated migrators.
#[derive(Debug, Default)]
pub struct PlaceholderCache {
    entries: Mutex<HashMap<(String, usize), Arc<str>>>,
}

impl PlaceholderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `($1,$2),($3,$4),…` for `rows` rows shaped by `casts`.
    ///
    /// A `Some(ty)` cast renders as `$n::ty`.
    pub fn placeholders(&self, casts: &[Option<String>], rows: usize) -> Arc<str> {
        let signature = casts
            .iter()
            .map(|cast| cast.as_deref().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");

        let key = (signature, rows);

        if let Some(hit) = self.entries.lock().get(&key) {
            return hit.clone();
        }

        let rendered: Arc<str> = render(casts, rows).into();
        self.entries.lock().insert(key, rendered.clone());

        rendered
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn render(casts: &[Option<String>], rows: usize) -> String {
    let mut out = String::with_capacity(rows * casts.len() * 8);
    let mut n = 0;

    for row in 0..rows {
        if row > 0 {
            out.push(',');
        }

        out.push('(');

        for (i, cast) in casts.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }

            n += 1;
            let _ = write!(out, "${n}");

            if let Some(cast) = cast {
                let _ = write!(out, "::{cast}");
            }
        }

        out.push(')');
    }

    out
}
