//! Reconcile an incoming frame onto a `TargetSchema` before it is upserted.
//!
//! Steps, in order: alias renames, casts to the schema's column kinds,
//! key ordering, derived-column fallbacks, identity canonicalization, and
//! finally projection onto the schema's columns with a null-key check.

use polars::prelude::*;
use std::collections::HashMap;

use crate::data::canonicalize::Canonicalizer;
use crate::data::schema::{ColumnKind, Derivation, IdentityColumns, SchemaError, TargetSchema};
use crate::domain::{frame, CertNumber};

pub fn reconcile(
    df: &DataFrame,
    schema: &TargetSchema,
    canon: &Canonicalizer,
) -> Result<DataFrame, SchemaError> {
    let mut out = df.clone();

    for (from, to) in &schema.aliases {
        if frame::has_column(&out, from) && !frame::has_column(&out, to) {
            out.rename(from, to.as_str().into())?;
        }
    }

    cast_columns(&mut out, schema)?;

    let mut lf = out.clone().lazy();
    if schema.key.iter().all(|k| frame::has_column(&out, k)) {
        lf = lf.sort(
            schema.key.clone(),
            SortMultipleOptions::default().with_maintain_order(true),
        );
    }

    let mut derived = Vec::new();
    for (target, derivation) in &schema.derivations {
        if frame::has_column(&out, target)
            || !derivation.inputs().iter().all(|c| frame::has_column(&out, c))
        {
            continue;
        }
        tracing::debug!(column = %target, "derived missing column");
        derived.push(derive(derivation).alias(target.as_str()));
    }
    let mut out = lf.with_columns(derived).collect()?;

    if let Some(identity) = &schema.identity {
        apply_identity(&mut out, identity, canon)?;
    }

    let dropped: Vec<String> = frame::column_names(&out)
        .into_iter()
        .filter(|c| !schema.has_column(c))
        .collect();
    if !dropped.is_empty() {
        tracing::debug!(table = %schema.table, columns = ?dropped, "dropping columns unknown to the schema");
    }

    let keep: Vec<&str> = schema
        .columns
        .iter()
        .map(|(c, _)| c.as_str())
        .filter(|c| frame::has_column(&out, c))
        .collect();
    let projected = out.select(keep)?;

    check_keys(&projected, schema)?;
    Ok(projected)
}

/// Cast every schema column to its kind; a non-null cell that does not
/// survive the cast is a `TypeMismatch`.
fn cast_columns(df: &mut DataFrame, schema: &TargetSchema) -> Result<(), SchemaError> {
    for name in frame::column_names(df) {
        let Some(kind) = schema.kind(&name) else {
            continue;
        };
        let column = df.column(&name)?;
        if column.dtype() == &kind.dtype() {
            continue;
        }
        let cast = kind.cast(column)?;
        let lost = column
            .is_not_null()
            .into_iter()
            .zip(cast.is_null().into_iter())
            .position(|(before, after)| before == Some(true) && after == Some(true));
        if let Some(row) = lost {
            return Err(SchemaError::TypeMismatch {
                column: name,
                row,
                expected: kind,
                value: column.get(row)?.str_value().into_owned(),
            });
        }
        df.with_column(cast)?;
    }
    Ok(())
}

fn derive(derivation: &Derivation) -> Expr {
    let numeric = |c: &str| col(c).cast(DataType::Float64);
    match derivation {
        Derivation::PctChange { source } => {
            let cur = numeric(source);
            let prev = cur.clone().shift(lit(1));
            when(prev.clone().neq(lit(0.0)))
                .then((cur / prev - lit(1.0)) * lit(100.0))
                .otherwise(lit(NULL))
                .cast(DataType::Float64)
        }
        Derivation::Difference {
            minuend,
            subtrahend,
        } => numeric(minuend) - numeric(subtrahend),
    }
}

/// Replace the name column with the canonical name of each row's identifier.
///
/// The raw name for an identifier is its first non-null name in row order,
/// so every row of one institution carries the same display name.
fn apply_identity(
    df: &mut DataFrame,
    identity: &IdentityColumns,
    canon: &Canonicalizer,
) -> Result<(), SchemaError> {
    let ids = match df.column(&identity.id) {
        Ok(c) => frame::ints(c)?,
        Err(_) => return Err(SchemaError::MissingColumn(identity.id.clone())),
    };
    let raw_names = match df.column(&identity.name) {
        Ok(c) => frame::texts(c)?,
        Err(_) => vec![None; ids.len()],
    };

    let mut first_raw: HashMap<i64, String> = HashMap::new();
    for (id, name) in ids.iter().zip(raw_names) {
        if let (Some(id), Some(name)) = (id, name) {
            first_raw.entry(*id).or_insert(name);
        }
    }

    let mut resolved = Vec::with_capacity(ids.len());
    for (row, id) in ids.iter().enumerate() {
        let Some(raw_id) = *id else {
            return Err(SchemaError::NullKey {
                column: identity.id.clone(),
                row,
            });
        };
        let cert = u32::try_from(raw_id).map_err(|_| SchemaError::TypeMismatch {
            column: identity.id.clone(),
            row,
            expected: ColumnKind::Integer,
            value: raw_id.to_string(),
        })?;
        resolved.push(canon.canonical_name(
            CertNumber(cert),
            first_raw.get(&raw_id).map(String::as_str),
        ));
    }

    df.with_column(Column::new(identity.name.as_str().into(), resolved))?;
    Ok(())
}

fn check_keys(df: &DataFrame, schema: &TargetSchema) -> Result<(), SchemaError> {
    for key in &schema.key {
        let Ok(column) = df.column(key) else {
            return Err(SchemaError::MissingColumn(key.clone()));
        };
        if let Some(row) = column.is_null().into_iter().position(|n| n == Some(true)) {
            return Err(SchemaError::NullKey {
                column: key.clone(),
                row,
            });
        }
    }
    Ok(())
}
