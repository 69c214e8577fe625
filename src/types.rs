//! Static C types and target layout queries.
//!
//! `TypeContext` plays the role of an AST context: it owns the record table
//! and the target description, and answers completeness, dependency and size
//! questions. Size queries are guarded and return [`LayoutError`] for types
//! whose size is not statically known; they never panic.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntKind {
    Bool,
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
}

impl IntKind {
    /// Plain `char` is signed, as on the common x86/arm64 ABIs.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntKind::Char | IntKind::SChar | IntKind::Short | IntKind::Int | IntKind::Long | IntKind::LongLong
        )
    }

    fn rank(self) -> u8 {
        match self {
            IntKind::Bool => 0,
            IntKind::Char | IntKind::SChar | IntKind::UChar => 1,
            IntKind::Short | IntKind::UShort => 2,
            IntKind::Int | IntKind::UInt => 3,
            IntKind::Long | IntKind::ULong => 4,
            IntKind::LongLong | IntKind::ULongLong => 5,
        }
    }

    fn to_unsigned(self) -> IntKind {
        match self {
            IntKind::Char | IntKind::SChar => IntKind::UChar,
            IntKind::Short => IntKind::UShort,
            IntKind::Int => IntKind::UInt,
            IntKind::Long => IntKind::ULong,
            IntKind::LongLong => IntKind::ULongLong,
            other => other,
        }
    }

    pub fn spelling(self) -> &'static str {
        match self {
            IntKind::Bool => "_Bool",
            IntKind::Char => "char",
            IntKind::SChar => "signed char",
            IntKind::UChar => "unsigned char",
            IntKind::Short => "short",
            IntKind::UShort => "unsigned short",
            IntKind::Int => "int",
            IntKind::UInt => "unsigned int",
            IntKind::Long => "long",
            IntKind::ULong => "unsigned long",
            IntKind::LongLong => "long long",
            IntKind::ULongLong => "unsigned long long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    Float,
    Double,
    LongDouble,
}

/// Bound of an array type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArraySize {
    Constant(u64),
    /// `T[]`
    Incomplete,
    /// Variable-length array, bound known only at run time.
    Variable,
    /// Bound depends on a template/generic parameter.
    Dependent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    Void,
    Int(IntKind),
    Float(FloatKind),
    Enum,
    Pointer(Box<CType>),
    Array(Box<CType>, ArraySize),
    Record(RecordId),
    Function {
        ret: Box<CType>,
        params: Vec<CType>,
        variadic: bool,
    },
    /// A type whose meaning depends on an uninstantiated parameter.
    Dependent(String),
    /// Anything the front end could not resolve (unknown typedef names etc).
    Unknown,
}

impl CType {
    pub fn pointer_to(ty: CType) -> CType {
        CType::Pointer(Box::new(ty))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_))
    }

    /// Integer types in the C sense: `_Bool`, the character types, the
    /// signed/unsigned integer types, and enumerations.
    pub fn is_integer(&self) -> bool {
        matches!(self, CType::Int(_) | CType::Enum)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, CType::Float(_))
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, CType::Void)
    }

    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn int_kind(&self) -> Option<IntKind> {
        match self {
            CType::Int(k) => Some(*k),
            CType::Enum => Some(IntKind::Int),
            _ => None,
        }
    }

    /// Array-to-pointer and function-to-pointer decay.
    pub fn decay(&self) -> CType {
        match self {
            CType::Array(elem, _) => CType::Pointer(elem.clone()),
            CType::Function { .. } => CType::Pointer(Box::new(self.clone())),
            other => other.clone(),
        }
    }

    /// Result type of the usual arithmetic conversions.
    pub fn usual_arithmetic(lhs: &CType, rhs: &CType) -> CType {
        match (lhs, rhs) {
            (CType::Float(a), CType::Float(b)) => {
                let rank = |k: &FloatKind| match k {
                    FloatKind::Float => 0,
                    FloatKind::Double => 1,
                    FloatKind::LongDouble => 2,
                };
                CType::Float(if rank(a) >= rank(b) { *a } else { *b })
            }
            (CType::Float(k), _) | (_, CType::Float(k)) => CType::Float(*k),
            _ => match (lhs.int_kind(), rhs.int_kind()) {
                (Some(a), Some(b)) => CType::Int(common_int(promote(a), promote(b))),
                _ => CType::Unknown,
            },
        }
    }
}

fn promote(kind: IntKind) -> IntKind {
    if kind.rank() < IntKind::Int.rank() { IntKind::Int } else { kind }
}

fn common_int(a: IntKind, b: IntKind) -> IntKind {
    if a == b {
        return a;
    }
    let (hi, lo) = if a.rank() >= b.rank() { (a, b) } else { (b, a) };
    if hi.rank() == lo.rank() {
        return hi.to_unsigned();
    }
    // The wider type can represent every value of the narrower one on the
    // supported data models, whatever the signedness.
    hi
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Struct,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: CType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDecl {
    pub name: Option<String>,
    pub kind: RecordKind,
    /// `None` until the definition is seen.
    pub fields: Option<Vec<FieldDecl>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub size: u64,
    pub align: u64,
    pub field_offsets: Vec<(String, u64)>,
}

/// Data model of the analysed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLayout {
    /// Pointer width in chars; 8 selects LP64, 4 selects ILP32.
    pub pointer_width: u64,
}

impl Default for TargetLayout {
    fn default() -> Self {
        Self { pointer_width: 8 }
    }
}

impl TargetLayout {
    pub fn int_size(&self, kind: IntKind) -> u64 {
        match kind {
            IntKind::Bool | IntKind::Char | IntKind::SChar | IntKind::UChar => 1,
            IntKind::Short | IntKind::UShort => 2,
            IntKind::Int | IntKind::UInt => 4,
            IntKind::Long | IntKind::ULong => self.pointer_width,
            IntKind::LongLong | IntKind::ULongLong => 8,
        }
    }

    pub fn float_size(&self, kind: FloatKind) -> u64 {
        match kind {
            FloatKind::Float => 4,
            FloatKind::Double => 8,
            FloatKind::LongDouble => {
                if self.pointer_width == 8 {
                    16
                } else {
                    12
                }
            }
        }
    }

    /// `size_t`
    pub fn size_type(&self) -> CType {
        if self.pointer_width == 8 {
            CType::Int(IntKind::ULong)
        } else {
            CType::Int(IntKind::UInt)
        }
    }

    /// `ptrdiff_t`
    pub fn ptrdiff_type(&self) -> CType {
        if self.pointer_width == 8 {
            CType::Int(IntKind::Long)
        } else {
            CType::Int(IntKind::Int)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("type `{0}` is incomplete")]
    Incomplete(String),
    #[error("type `{0}` is dependent")]
    Dependent(String),
    #[error("type `{0}` does not have a constant size")]
    VariableLength(String),
    #[error("type `{0}` is not an object type")]
    NotObject(String),
    #[error("type `{0}` is not a struct or union")]
    NotARecord(String),
    #[error("`{record}` has no member named `{field}`")]
    NoSuchField { record: String, field: String },
    #[error("record nesting too deep while laying out `{0}`")]
    TooDeep(String),
}

/// How pointer arithmetic scales an integer addend for a given pointer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointeeScale {
    /// Pointee is provably one char wide; scaling is the identity.
    Byte,
    /// Pointee size is statically known and is not one char.
    Scaled(u64),
    /// Null, incomplete, dependent or variably sized pointee.
    Unknown,
}

const MAX_RECORD_DEPTH: usize = 32;

/// Owner of record definitions and the target description.
#[derive(Debug, Clone, Default)]
pub struct TypeContext {
    pub target: TargetLayout,
    records: Vec<RecordDecl>,
}

impl TypeContext {
    pub fn new(target: TargetLayout) -> Self {
        Self {
            target,
            records: Vec::new(),
        }
    }

    pub fn add_record(&mut self, decl: RecordDecl) -> RecordId {
        let id = RecordId(self.records.len() as u32);
        self.records.push(decl);
        id
    }

    pub fn record(&self, id: RecordId) -> &RecordDecl {
        &self.records[id.0 as usize]
    }

    pub fn complete_record(&mut self, id: RecordId, fields: Vec<FieldDecl>) {
        self.records[id.0 as usize].fields = Some(fields);
    }

    pub fn is_incomplete(&self, ty: &CType) -> bool {
        match ty {
            CType::Void | CType::Unknown => true,
            CType::Array(_, ArraySize::Incomplete) => true,
            CType::Record(id) => self.record(*id).fields.is_none(),
            _ => false,
        }
    }

    pub fn is_dependent(&self, ty: &CType) -> bool {
        match ty {
            CType::Dependent(_) => true,
            CType::Array(_, ArraySize::Dependent(_)) => true,
            CType::Array(elem, _) | CType::Pointer(elem) => self.is_dependent(elem),
            CType::Function { ret, params, .. } => {
                self.is_dependent(ret) || params.iter().any(|p| self.is_dependent(p))
            }
            _ => false,
        }
    }

    pub fn is_dependent_sized_array(&self, ty: &CType) -> bool {
        matches!(ty, CType::Array(_, ArraySize::Dependent(_)))
    }

    /// Whether the size of `ty` is a compile-time constant. Only meaningful
    /// for complete, non-dependent types.
    pub fn is_constant_size(&self, ty: &CType) -> bool {
        if self.is_incomplete(ty) || self.is_dependent(ty) {
            return false;
        }
        match ty {
            CType::Array(_, ArraySize::Variable) => false,
            CType::Array(elem, _) => self.is_constant_size(elem),
            CType::Function { .. } => false,
            _ => true,
        }
    }

    pub fn size_in_chars(&self, ty: &CType) -> Result<u64, LayoutError> {
        self.size_in_chars_at(ty, 0)
    }

    fn size_in_chars_at(&self, ty: &CType, depth: usize) -> Result<u64, LayoutError> {
        self.check_sized(ty)?;
        match ty {
            CType::Int(kind) => Ok(self.target.int_size(*kind)),
            CType::Float(kind) => Ok(self.target.float_size(*kind)),
            CType::Enum => Ok(4),
            CType::Pointer(_) => Ok(self.target.pointer_width),
            CType::Array(elem, ArraySize::Constant(n)) => {
                Ok(self.size_in_chars_at(elem, depth)?.saturating_mul(*n))
            }
            CType::Record(id) => Ok(self.record_layout_at(*id, depth)?.size),
            _ => Err(LayoutError::NotObject(self.spell(ty))),
        }
    }

    fn check_sized(&self, ty: &CType) -> Result<(), LayoutError> {
        if matches!(ty, CType::Function { .. }) {
            return Err(LayoutError::NotObject(self.spell(ty)));
        }
        if self.is_incomplete(ty) {
            return Err(LayoutError::Incomplete(self.spell(ty)));
        }
        if self.is_dependent(ty) {
            return Err(LayoutError::Dependent(self.spell(ty)));
        }
        if !self.is_constant_size(ty) {
            return Err(LayoutError::VariableLength(self.spell(ty)));
        }
        Ok(())
    }

    pub fn align_of(&self, ty: &CType) -> Result<u64, LayoutError> {
        self.align_of_at(ty, 0)
    }

    fn align_of_at(&self, ty: &CType, depth: usize) -> Result<u64, LayoutError> {
        match ty {
            CType::Array(elem, _) => self.align_of_at(elem, depth),
            CType::Record(id) => Ok(self.record_layout_at(*id, depth)?.align),
            CType::Float(FloatKind::LongDouble) if self.target.pointer_width == 4 => Ok(4),
            CType::Int(IntKind::LongLong | IntKind::ULongLong) | CType::Float(FloatKind::Double)
                if self.target.pointer_width == 4 =>
            {
                Ok(4)
            }
            other => self.size_in_chars_at(other, depth),
        }
    }

    pub fn record_layout(&self, id: RecordId) -> Result<RecordLayout, LayoutError> {
        self.record_layout_at(id, 0)
    }

    fn record_layout_at(&self, id: RecordId, depth: usize) -> Result<RecordLayout, LayoutError> {
        let ty = CType::Record(id);
        if depth > MAX_RECORD_DEPTH {
            return Err(LayoutError::TooDeep(self.spell(&ty)));
        }
        let decl = self.record(id);
        let Some(fields) = decl.fields.as_ref() else {
            return Err(LayoutError::Incomplete(self.spell(&ty)));
        };

        let mut offset = 0u64;
        let mut size = 0u64;
        let mut align = 1u64;
        let mut field_offsets = Vec::with_capacity(fields.len());
        for field in fields {
            // A trailing flexible array member contributes alignment only.
            let (field_size, field_align) = match &field.ty {
                CType::Array(elem, ArraySize::Incomplete) => (0, self.align_of_at(elem, depth + 1)?),
                other => (
                    self.size_in_chars_at(other, depth + 1)?,
                    self.align_of_at(other, depth + 1)?,
                ),
            };
            align = align.max(field_align);
            match decl.kind {
                RecordKind::Struct => {
                    offset = round_up(offset, field_align);
                    field_offsets.push((field.name.clone(), offset));
                    offset += field_size;
                    size = offset;
                }
                RecordKind::Union => {
                    field_offsets.push((field.name.clone(), 0));
                    size = size.max(field_size);
                }
            }
        }

        Ok(RecordLayout {
            size: round_up(size, align),
            align,
            field_offsets,
        })
    }

    /// Byte offset of `field` inside the record type `ty`.
    pub fn field_offset(&self, ty: &CType, field: &str) -> Result<u64, LayoutError> {
        let CType::Record(id) = ty else {
            return Err(LayoutError::NotARecord(self.spell(ty)));
        };
        let layout = self.record_layout(*id)?;
        layout
            .field_offsets
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, offset)| *offset)
            .ok_or_else(|| LayoutError::NoSuchField {
                record: self.spell(ty),
                field: field.to_string(),
            })
    }

    /// Type of `field` inside the record type `ty`, if it is known.
    pub fn field_type(&self, ty: &CType, field: &str) -> Option<CType> {
        let CType::Record(id) = ty else {
            return None;
        };
        self.record(*id)
            .fields
            .as_ref()?
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.ty.clone())
    }

    /// Classify how pointer arithmetic on `ptr_ty` scales its addend.
    ///
    /// Only a pointee that is complete, non-dependent, of constant size and
    /// exactly one char wide is reported as [`PointeeScale::Byte`]; every
    /// other failure to prove the size yields [`PointeeScale::Unknown`].
    pub fn classify_pointee(&self, ptr_ty: &CType) -> PointeeScale {
        let Some(pointee) = ptr_ty.pointee() else {
            return PointeeScale::Unknown;
        };
        if self.is_incomplete(pointee)
            || self.is_dependent(pointee)
            || self.is_dependent_sized_array(pointee)
            || !self.is_constant_size(pointee)
        {
            return PointeeScale::Unknown;
        }
        match self.size_in_chars(pointee) {
            Ok(1) => PointeeScale::Byte,
            Ok(n) => PointeeScale::Scaled(n),
            Err(_) => PointeeScale::Unknown,
        }
    }

    /// C spelling of a type, for messages.
    pub fn spell(&self, ty: &CType) -> String {
        match ty {
            CType::Void => "void".to_string(),
            CType::Int(kind) => kind.spelling().to_string(),
            CType::Float(FloatKind::Float) => "float".to_string(),
            CType::Float(FloatKind::Double) => "double".to_string(),
            CType::Float(FloatKind::LongDouble) => "long double".to_string(),
            CType::Enum => "enum".to_string(),
            CType::Pointer(inner) => format!("{} *", self.spell(inner)),
            CType::Array(elem, size) => match size {
                ArraySize::Constant(n) => format!("{}[{n}]", self.spell(elem)),
                ArraySize::Incomplete => format!("{}[]", self.spell(elem)),
                ArraySize::Variable => format!("{}[*]", self.spell(elem)),
                ArraySize::Dependent(param) => format!("{}[{param}]", self.spell(elem)),
            },
            CType::Record(id) => {
                let decl = self.record(*id);
                let keyword = match decl.kind {
                    RecordKind::Struct => "struct",
                    RecordKind::Union => "union",
                };
                match &decl.name {
                    Some(name) => format!("{keyword} {name}"),
                    None => format!("{keyword} (anonymous)"),
                }
            }
            CType::Function { ret, params, variadic } => {
                let mut args: Vec<String> = params.iter().map(|p| self.spell(p)).collect();
                if *variadic {
                    args.push("...".to_string());
                }
                format!("{} ({})", self.spell(ret), args.join(", "))
            }
            CType::Dependent(name) => name.clone(),
            CType::Unknown => "<unknown>".to_string(),
        }
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_struct() -> (TypeContext, CType) {
        let mut ctx = TypeContext::new(TargetLayout::default());
        let id = ctx.add_record(RecordDecl {
            name: Some("S".to_string()),
            kind: RecordKind::Struct,
            fields: None,
        });
        ctx.complete_record(
            id,
            vec![
                FieldDecl {
                    name: "tag".to_string(),
                    ty: CType::Int(IntKind::Char),
                },
                FieldDecl {
                    name: "value".to_string(),
                    ty: CType::Int(IntKind::Long),
                },
            ],
        );
        (ctx, CType::Record(id))
    }

    #[test]
    fn struct_layout_uses_natural_alignment() {
        let (ctx, s) = ctx_with_struct();
        assert_eq!(ctx.size_in_chars(&s), Ok(16));
        assert_eq!(ctx.field_offset(&s, "value"), Ok(8));
        assert!(matches!(
            ctx.field_offset(&s, "missing"),
            Err(LayoutError::NoSuchField { .. })
        ));
    }

    #[test]
    fn ilp32_shrinks_long_and_pointers() {
        let ctx = TypeContext::new(TargetLayout { pointer_width: 4 });
        assert_eq!(ctx.size_in_chars(&CType::Int(IntKind::Long)), Ok(4));
        assert_eq!(ctx.size_in_chars(&CType::pointer_to(CType::Void)), Ok(4));
        assert_eq!(ctx.target.size_type(), CType::Int(IntKind::UInt));
    }

    #[test]
    fn size_query_rejects_unsized_types() {
        let ctx = TypeContext::default();
        assert!(matches!(ctx.size_in_chars(&CType::Void), Err(LayoutError::Incomplete(_))));
        assert!(matches!(
            ctx.size_in_chars(&CType::Dependent("T".into())),
            Err(LayoutError::Dependent(_))
        ));
        let vla = CType::Array(Box::new(CType::Int(IntKind::Int)), ArraySize::Variable);
        assert!(matches!(ctx.size_in_chars(&vla), Err(LayoutError::VariableLength(_))));
    }

    #[test]
    fn classify_pointee_is_tri_state() {
        let (mut ctx, s) = ctx_with_struct();
        let ptr = |t: CType| CType::pointer_to(t);

        assert_eq!(ctx.classify_pointee(&ptr(CType::Int(IntKind::Char))), PointeeScale::Byte);
        assert_eq!(ctx.classify_pointee(&ptr(CType::Int(IntKind::UChar))), PointeeScale::Byte);
        assert_eq!(ctx.classify_pointee(&ptr(CType::Int(IntKind::Int))), PointeeScale::Scaled(4));
        assert_eq!(ctx.classify_pointee(&ptr(s)), PointeeScale::Scaled(16));

        let fwd = ctx.add_record(RecordDecl {
            name: Some("Opaque".to_string()),
            kind: RecordKind::Struct,
            fields: None,
        });
        assert_eq!(ctx.classify_pointee(&ptr(CType::Record(fwd))), PointeeScale::Unknown);
        assert_eq!(ctx.classify_pointee(&ptr(CType::Void)), PointeeScale::Unknown);
        assert_eq!(ctx.classify_pointee(&ptr(CType::Dependent("T".into()))), PointeeScale::Unknown);
        let dep_arr = CType::Array(Box::new(CType::Int(IntKind::Char)), ArraySize::Dependent("N".into()));
        assert_eq!(ctx.classify_pointee(&ptr(dep_arr)), PointeeScale::Unknown);
        let vla = CType::Array(Box::new(CType::Int(IntKind::Char)), ArraySize::Variable);
        assert_eq!(ctx.classify_pointee(&ptr(vla)), PointeeScale::Unknown);
        assert_eq!(ctx.classify_pointee(&CType::Int(IntKind::Int)), PointeeScale::Unknown);
    }

    #[test]
    fn one_element_char_array_is_byte_sized() {
        let ctx = TypeContext::default();
        let arr = CType::Array(Box::new(CType::Int(IntKind::Char)), ArraySize::Constant(1));
        assert_eq!(ctx.classify_pointee(&CType::pointer_to(arr)), PointeeScale::Byte);
    }

    #[test]
    fn usual_arithmetic_conversions() {
        let int = CType::Int(IntKind::Int);
        let uchar = CType::Int(IntKind::UChar);
        let ulong = CType::Int(IntKind::ULong);
        assert_eq!(CType::usual_arithmetic(&uchar, &uchar), int);
        assert_eq!(CType::usual_arithmetic(&int, &ulong), ulong);
        assert_eq!(
            CType::usual_arithmetic(&int, &CType::Int(IntKind::UInt)),
            CType::Int(IntKind::UInt)
        );
        assert_eq!(
            CType::usual_arithmetic(&int, &CType::Float(FloatKind::Double)),
            CType::Float(FloatKind::Double)
        );
    }
}
