//! Shape-directed morphing.
//!
//! `morph` scores a value against a shape and rewrites it to conform. The
//! score tuple `(named_matches, tag_depth, assignment_weight,
//! positional_matches)` compares lexicographically; unions try every variant
//! and keep the best. Three entry points share the algorithm:
//!
//! - [`morph`]: defaults applied, extras kept.
//! - [`strong_morph`]: same, then extras not declared in the shape reject.
//! - [`weak_morph`]: the intersection of named fields, no defaults, no
//!   recursion, no validation.
//!
//! Non-struct values are wrapped as one-field positional structs so the field
//! machinery only ever sees structs, then unwrapped again for primitive
//! targets.

use std::rc::Rc;

use crate::{
    function::Block,
    shape::{BlockShape, FieldDef, PrimitiveShape, ShapeDef, ShapeRef},
    tag::{TagRef, is_compatible},
    value::{BlockValue, FieldKey, Value},
};

/// How a morph is applied; the three operator spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum MorphMode {
    #[strum(serialize = "~")]
    Normal,
    #[strum(serialize = "~*")]
    Strong,
    #[strum(serialize = "~?")]
    Weak,
}

/// Result of a morph: the score components and the rewritten value.
///
/// `value` is `None` when the value did not match. Scores compare
/// lexicographically in field order; higher is better.
#[derive(Debug, Clone)]
pub struct MorphResult {
    pub named_matches: i32,
    pub tag_depth: i32,
    pub assignment_weight: i32,
    pub positional_matches: i32,
    pub value: Option<Value>,
}

impl MorphResult {
    /// The zero score with no match.
    #[must_use]
    pub fn no_match() -> Self {
        Self { named_matches: 0, tag_depth: 0, assignment_weight: 0, positional_matches: -1, value: None }
    }

    #[must_use]
    pub fn matched(value: Value) -> Self {
        Self { value: Some(value), ..Self::no_match() }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.value.is_some()
    }

    /// Score components as a tuple for comparison.
    #[must_use]
    pub fn score(&self) -> (i32, i32, i32, i32) {
        (self.named_matches, self.tag_depth, self.assignment_weight, self.positional_matches)
    }

    fn better_than(&self, other: &Self) -> bool {
        self.score() > other.score()
    }
}

/// Applies a morph in the given mode.
#[must_use]
pub fn apply(value: &Value, shape: &ShapeRef, mode: MorphMode) -> MorphResult {
    match mode {
        MorphMode::Normal => morph(value, shape),
        MorphMode::Strong => strong_morph(value, shape),
        MorphMode::Weak => weak_morph(value, shape),
    }
}

/// Normal morph: wrap scalars, match fields, apply defaults, keep extras.
#[must_use]
pub fn morph(value: &Value, shape: &ShapeRef) -> MorphResult {
    // Raw block + block-shape is a specialization, not a field match.
    let scalar = value.as_scalar();
    if let Value::Block(BlockValue::Raw(raw)) = &scalar {
        if let Some(block_shape) = block_shape_target(shape) {
            let block = Block::new(Rc::clone(raw), block_shape);
            let mut result = MorphResult::matched(Value::Block(BlockValue::Typed(Rc::new(block))));
            result.named_matches = 1;
            return result;
        }
        return MorphResult::no_match();
    }

    let was_wrapped = !value.is_struct();
    let wrapped = value.as_struct();
    let mut result = morph_any(&wrapped, shape, was_wrapped);

    // 5 ~num stays 5; 5 ~(x ~num) stays a struct.
    let unwrapped = if was_wrapped && primitive_target(shape).is_some() {
        match &result.value {
            Some(Value::Struct(fields)) if fields.len() == 1 => Some(fields[0].1.clone()),
            _ => None,
        }
    } else {
        None
    };
    if let Some(inner) = unwrapped {
        result.value = Some(inner);
    }
    result
}

/// Strong morph (`~*`): normal morph, then reject results with extra fields
/// not declared in the shape.
#[must_use]
pub fn strong_morph(value: &Value, shape: &ShapeRef) -> MorphResult {
    let result = morph(value, shape);
    if !result.success() {
        return result;
    }
    let ShapeRef::Def(def) = shape else {
        return result;
    };
    if def.variants.is_some() {
        return result;
    }

    let has_positional = def.fields.iter().any(FieldDef::is_positional);
    if let Some(Value::Struct(fields)) = &result.value {
        for (key, _) in fields.iter() {
            match key {
                FieldKey::Unnamed(_) => {
                    if !has_positional {
                        return MorphResult::no_match();
                    }
                }
                FieldKey::Name(name) => {
                    let declared = def
                        .fields
                        .iter()
                        .any(|f| f.name.as_deref() == Some(name.as_ref()));
                    if !declared {
                        return MorphResult::no_match();
                    }
                }
            }
        }
    }
    result
}

/// Weak morph (`~?`): the intersection of named fields between value and
/// shape. No defaults, no recursion, no validation; always succeeds for
/// structs, possibly with an empty result.
#[must_use]
pub fn weak_morph(value: &Value, shape: &ShapeRef) -> MorphResult {
    let Value::Struct(fields) = value else {
        return MorphResult::no_match();
    };
    let ShapeRef::Def(def) = shape else {
        return MorphResult::no_match();
    };

    let mut filtered = Vec::new();
    let mut matched = 0;
    for (key, field_value) in fields.iter() {
        if let FieldKey::Name(name) = key
            && def.fields.iter().any(|f| f.name.as_deref() == Some(name.as_ref()))
        {
            filtered.push((key.clone(), field_value.clone()));
            matched += 1;
        }
    }

    let mut result = MorphResult::matched(Value::struct_from(filtered));
    result.named_matches = matched;
    result
}

/// The block-shape behind a morph target, unwrapping a shape whose single
/// positional field is a block-shape.
fn block_shape_target(shape: &ShapeRef) -> Option<Rc<BlockShape>> {
    match shape {
        ShapeRef::Block(block) => Some(Rc::clone(block)),
        ShapeRef::Def(def) if def.variants.is_none() && def.fields.len() == 1 => {
            let field = &def.fields[0];
            if field.is_positional()
                && let Some(ShapeRef::Block(block)) = &field.constraint
            {
                Some(Rc::clone(block))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Whether this shape names a primitive that unwraps wrapped scalars.
fn primitive_target(shape: &ShapeRef) -> Option<PrimitiveShape> {
    match shape {
        ShapeRef::Primitive(p) => Some(*p),
        ShapeRef::Tag(_) => Some(PrimitiveShape::Tag),
        _ => None,
    }
}

/// Internal morph without wrapping, used for recursive field morphs.
fn morph_any(value: &Value, shape: &ShapeRef, was_wrapped: bool) -> MorphResult {
    if let ShapeRef::Def(def) = shape
        && let Some(variants) = &def.variants
    {
        let mut best = MorphResult::no_match();
        for variant in variants {
            let candidate = morph_any(value, variant, was_wrapped);
            if candidate.success() && candidate.better_than(&best) {
                best = candidate;
            }
        }
        return best;
    }
    morph_struct(value, shape, was_wrapped)
}

/// Unwraps a one-field struct for primitive matching; named or unnamed.
fn peel_single(value: &Value) -> Value {
    if let Value::Struct(fields) = value
        && fields.len() == 1
    {
        return fields[0].1.clone();
    }
    value.clone()
}

fn morph_primitive(value: &Value, primitive: PrimitiveShape) -> MorphResult {
    let mut candidate = peel_single(value);

    // A tag with an associated value can stand in for that value.
    if let Value::Tag(tag) = &candidate
        && !matches!(primitive, PrimitiveShape::Tag | PrimitiveShape::Bool)
    {
        match &tag.0.value {
            Some(tag_value) => candidate = tag_value.clone(),
            None => return MorphResult::no_match(),
        }
    }

    let matches = match primitive {
        PrimitiveShape::Num => candidate.is_number(),
        PrimitiveShape::Text => candidate.is_text(),
        PrimitiveShape::Block => candidate.is_block(),
        _ => false,
    };
    if matches {
        let mut result = MorphResult::matched(candidate);
        result.positional_matches = 0;
        result
    } else {
        MorphResult::no_match()
    }
}

fn morph_struct(value: &Value, shape: &ShapeRef, was_wrapped: bool) -> MorphResult {
    match shape {
        ShapeRef::Primitive(primitive) => match primitive {
            PrimitiveShape::Num | PrimitiveShape::Text | PrimitiveShape::Block => {
                morph_primitive(value, *primitive)
            }
            PrimitiveShape::Bool => {
                let candidate = peel_single(value);
                if let Value::Tag(tag) = &candidate
                    && matches!(tag.name(), "true" | "false")
                {
                    let mut result = MorphResult::matched(candidate);
                    result.tag_depth = 1;
                    return result;
                }
                MorphResult::no_match()
            }
            PrimitiveShape::Tag => {
                let candidate = peel_single(value);
                if candidate.is_tag() {
                    let mut result = MorphResult::matched(candidate);
                    result.tag_depth = 1;
                    return result;
                }
                MorphResult::no_match()
            }
            PrimitiveShape::Struct => {
                // ~struct rejects scalars that were promoted on the way in:
                // 5 ~struct fails, (5) ~struct succeeds.
                if was_wrapped {
                    return MorphResult::no_match();
                }
                let mut result = MorphResult::matched(value.clone());
                result.positional_matches = 0;
                result
            }
            PrimitiveShape::Any => {
                let mut result = MorphResult::matched(value.clone());
                result.positional_matches = 0;
                result
            }
        },
        ShapeRef::Tag(field_tag) => morph_tag_constraint(value, field_tag),
        ShapeRef::Block(_) => MorphResult::no_match(),
        ShapeRef::Def(def) => morph_fields(value, def),
    }
}

/// A tag constraint matches a compatible tag value, or a struct carrying a
/// compatible tag in an unnamed field (which is how `~#fail` matches
/// failures).
fn morph_tag_constraint(value: &Value, field_tag: &TagRef) -> MorphResult {
    let candidate = peel_single(value);
    if let Value::Tag(tag) = &candidate {
        if is_compatible(tag, field_tag) {
            let mut result = MorphResult::matched(candidate.clone());
            result.tag_depth = i32::try_from(tag.depth()).unwrap_or(i32::MAX);
            return result;
        }
        return MorphResult::no_match();
    }
    if let Value::Struct(fields) = value {
        for (key, field_value) in fields.iter() {
            if matches!(key, FieldKey::Unnamed(_))
                && let Value::Tag(tag) = field_value
                && is_compatible(tag, field_tag)
            {
                let mut result = MorphResult::matched(value.clone());
                result.tag_depth = i32::try_from(tag.depth()).unwrap_or(i32::MAX);
                return result;
            }
        }
    }
    MorphResult::no_match()
}

/// The four-phase field matcher for structural shapes.
fn morph_fields(value: &Value, def: &ShapeDef) -> MorphResult {
    let Value::Struct(value_fields) = value else {
        return MorphResult::no_match();
    };

    // A field-less shape accepts any struct with the minimal score.
    if def.fields.is_empty() {
        let mut result = MorphResult::matched(value.clone());
        result.positional_matches = 0;
        return result;
    }

    // Unfilled shape fields, tracked by index so declaration order survives.
    let mut unfilled_named: Vec<usize> = def
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_named())
        .map(|(i, _)| i)
        .collect();
    let mut unfilled_positional: Vec<usize> = def
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_positional())
        .map(|(i, _)| i)
        .collect();

    let mut matched: Vec<(FieldKey, Value)> = Vec::new();
    let mut unmatched: Vec<(FieldKey, Value)> = Vec::new();
    let mut named_matches = 0i32;
    let mut tag_depth = 0i32;
    let mut positional_matches = 0i32;

    let take_named = |unfilled: &mut Vec<usize>, name: &str, fields: &[FieldDef]| -> Option<usize> {
        let slot = unfilled
            .iter()
            .position(|&i| fields[i].name.as_deref() == Some(name))?;
        Some(unfilled.remove(slot))
    };

    // Phase 1: named fields of the value against declared names.
    for (key, field_value) in value_fields.iter() {
        let FieldKey::Name(name) = key else {
            unmatched.push((key.clone(), field_value.clone()));
            continue;
        };
        let Some(index) = take_named(&mut unfilled_named, name, &def.fields) else {
            unmatched.push((key.clone(), field_value.clone()));
            continue;
        };
        let field = &def.fields[index];
        match morph_field_value(field_value, field) {
            Some(morphed) => matched.push((key.clone(), morphed)),
            None => return MorphResult::no_match(),
        }
        named_matches += 1;
    }

    // Phase 2: unnamed tag values promote into named tag-constrained fields.
    let mut still_unmatched = Vec::with_capacity(unmatched.len());
    for (key, field_value) in unmatched {
        let promoted = if matches!(key, FieldKey::Unnamed(_))
            && let Value::Tag(input_tag) = &field_value
        {
            let slot = unfilled_named.iter().position(|&i| {
                matches!(&def.fields[i].constraint, Some(ShapeRef::Tag(field_tag))
                    if is_compatible(input_tag, field_tag))
            });
            match slot {
                Some(slot) => {
                    let index = unfilled_named.remove(slot);
                    let name = def.fields[index].name.clone().expect("named slot");
                    matched.push((FieldKey::Name(name), field_value.clone()));
                    named_matches += 1;
                    tag_depth += i32::try_from(input_tag.depth()).unwrap_or(i32::MAX);
                    true
                }
                None => false,
            }
        } else {
            false
        };
        if !promoted {
            still_unmatched.push((key, field_value));
        }
    }

    // Phase 3a: remaining unnamed values fill positional shape fields in order.
    let mut positional_values: Vec<(FieldKey, Value)> = Vec::new();
    let mut extras: Vec<(FieldKey, Value)> = Vec::new();
    for (key, field_value) in still_unmatched {
        if matches!(key, FieldKey::Unnamed(_)) {
            positional_values.push((key, field_value));
        } else {
            extras.push((key, field_value));
        }
    }

    let mut remaining_values = positional_values.into_iter();
    for (key, field_value) in remaining_values.by_ref().take(unfilled_positional.len()) {
        let index = unfilled_positional.remove(0);
        let field = &def.fields[index];
        match morph_field_value(&field_value, field) {
            Some(morphed) => matched.push((key, morphed)),
            None => return MorphResult::no_match(),
        }
        positional_matches += 1;
    }

    // Phase 3b: leftover unnamed values adopt unfilled named fields in
    // declaration order.
    let mut leftover_unnamed = Vec::new();
    for (key, field_value) in remaining_values {
        if unfilled_named.is_empty() {
            leftover_unnamed.push((key, field_value));
            continue;
        }
        let index = unfilled_named.remove(0);
        let field = &def.fields[index];
        let name = field.name.clone().expect("named slot");
        match morph_field_value(&field_value, field) {
            Some(morphed) => matched.push((FieldKey::Name(name), morphed)),
            None => return MorphResult::no_match(),
        }
        named_matches += 1;
    }

    // Phase 4: defaults for whatever is still unfilled; required fields fail.
    for index in unfilled_named {
        let field = &def.fields[index];
        match &field.default {
            Some(default) => {
                let name = field.name.clone().expect("named slot");
                matched.push((FieldKey::Name(name), default.clone()));
            }
            None => return MorphResult::no_match(),
        }
    }
    for index in unfilled_positional {
        let field = &def.fields[index];
        match &field.default {
            Some(default) => matched.push((FieldKey::unnamed(), default.clone())),
            None => return MorphResult::no_match(),
        }
    }

    // Extras pass through unchanged in normal mode.
    matched.extend(extras);
    matched.extend(leftover_unnamed);

    MorphResult {
        named_matches,
        tag_depth,
        assignment_weight: 0,
        positional_matches,
        value: Some(Value::struct_from(matched)),
    }
}

/// Recursively morphs one field value against its constraint, if any.
fn morph_field_value(value: &Value, field: &FieldDef) -> Option<Value> {
    match &field.constraint {
        Some(constraint) => {
            let result = morph_any(value, constraint, false);
            result.value
        }
        None => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::num::Decimal;

    fn num(n: i64) -> Value {
        Value::Number(Decimal::from_i64(n))
    }

    fn named(name: &str, value: Value) -> (FieldKey, Value) {
        (FieldKey::name(name), value)
    }

    fn field(name: Option<&str>, constraint: Option<ShapeRef>, default: Option<Value>) -> FieldDef {
        FieldDef { name: name.map(std::rc::Rc::from), constraint, default }
    }

    fn num_shape() -> ShapeRef {
        ShapeRef::Primitive(PrimitiveShape::Num)
    }

    /// (x ~num, y ~num)
    fn xy_shape() -> ShapeRef {
        ShapeRef::anonymous(vec![
            field(Some("x"), Some(num_shape()), None),
            field(Some("y"), Some(num_shape()), None),
        ])
    }

    #[test]
    fn named_matching_keeps_extras() {
        let value = Value::struct_from(vec![
            named("x", num(1)),
            named("y", num(2)),
            named("z", num(3)),
        ]);
        let result = morph(&value, &xy_shape());
        assert_eq!(result.named_matches, 2);
        let morphed = result.value.unwrap();
        assert_eq!(morphed.field("z"), Some(&num(3)));
        assert_eq!(morphed.field("x"), Some(&num(1)));
    }

    #[test]
    fn strong_rejects_extras() {
        let value = Value::struct_from(vec![
            named("x", num(1)),
            named("y", num(2)),
            named("z", num(3)),
        ]);
        assert!(!strong_morph(&value, &xy_shape()).success());

        let exact = Value::struct_from(vec![named("x", num(1)), named("y", num(2))]);
        assert!(strong_morph(&exact, &xy_shape()).success());
    }

    #[test]
    fn weak_is_the_intersection() {
        let value = Value::struct_from(vec![
            named("x", num(1)),
            named("y", num(2)),
            named("z", num(3)),
            (FieldKey::unnamed(), num(9)),
        ]);
        let result = weak_morph(&value, &xy_shape());
        let morphed = result.value.unwrap();
        let fields = morphed.as_struct_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(result.named_matches, 2);
    }

    #[test]
    fn positional_values_adopt_names() {
        // {5 7} ~ (x ~num, y ~num) => {x=5 y=7}
        let value = Value::struct_from(vec![
            (FieldKey::unnamed(), num(5)),
            (FieldKey::unnamed(), num(7)),
        ]);
        let result = morph(&value, &xy_shape());
        assert!(result.success());
        let morphed = result.value.unwrap();
        assert_eq!(morphed.field("x"), Some(&num(5)));
        assert_eq!(morphed.field("y"), Some(&num(7)));
        assert_eq!(result.named_matches, 2);
    }

    #[test]
    fn defaults_fill_missing_and_required_fail() {
        let shape = ShapeRef::anonymous(vec![
            field(Some("host"), None, None),
            field(Some("port"), Some(num_shape()), Some(num(80))),
        ]);
        let value = Value::struct_from(vec![named("host", Value::text("localhost"))]);
        let morphed = morph(&value, &shape).value.unwrap();
        assert_eq!(morphed.field("port"), Some(&num(80)));

        let empty = Value::empty();
        assert!(!morph(&empty, &shape).success());
    }

    #[test]
    fn scalars_wrap_and_unwrap() {
        assert_eq!(morph(&num(5), &num_shape()).value.unwrap(), num(5));
        let wrapped = num(5).as_struct();
        assert_eq!(morph(&wrapped, &num_shape()).value.unwrap(), num(5));
        assert!(!morph(&Value::text("x"), &num_shape()).success());
    }

    #[test]
    fn struct_primitive_rejects_promoted_scalars() {
        assert!(!morph(&num(5), &ShapeRef::Primitive(PrimitiveShape::Struct)).success());
        let real = Value::struct_from(vec![(FieldKey::unnamed(), num(5))]);
        assert!(morph(&real, &ShapeRef::Primitive(PrimitiveShape::Struct)).success());
    }

    #[test]
    fn unions_pick_the_best_variant() {
        let union = ShapeRef::union(vec![num_shape(), xy_shape()]);
        let value = Value::struct_from(vec![named("x", num(1)), named("y", num(2))]);
        let result = morph(&value, &union);
        // The struct variant scores two named matches, beating the primitive.
        assert_eq!(result.named_matches, 2);
        assert_eq!(morph(&num(3), &union).value.unwrap(), num(3));
    }

    #[test]
    fn idempotence_of_normal_morph() {
        let value = Value::struct_from(vec![
            (FieldKey::unnamed(), num(5)),
            (FieldKey::unnamed(), num(7)),
            named("extra", Value::text("kept")),
        ]);
        let first = morph(&value, &xy_shape());
        let first_value = first.value.clone().unwrap();
        let second = morph(&first_value, &xy_shape());
        assert_eq!(first.score(), second.score());
        assert_eq!(second.value.unwrap(), first_value);
    }
}
