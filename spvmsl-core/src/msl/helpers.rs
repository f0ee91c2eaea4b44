//! Catalog of helper functions emitted ahead of user code.
//!
//! Tags order by catalog position, which is also the emission order.

use log::trace;

use super::CompilerMsl;

/// Deepest array nesting the array copy helpers are generated for.
pub const MAX_ARRAY_COPY_DIMENSIONS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HelperTag {
    Mod,
    Radians,
    Degrees,
    FindILsb,
    FindSMsb,
    FindUMsb,
    SSign,
    /// Array copy for the given nesting depth (1 ..= 6).
    ArrayCopy(u32),
    TexelBufferCoords,
    Inverse4x4,
    Inverse3x3,
    Inverse2x2,
    RowMajor2x3,
    RowMajor2x4,
    RowMajor3x2,
    RowMajor3x4,
    RowMajor4x2,
    RowMajor4x3,
    TextureSwizzle,
}

impl HelperTag {
    /// The tag plus every helper its text calls.
    pub fn closure(self) -> Vec<HelperTag> {
        match self {
            HelperTag::ArrayCopy(dims) => (1..=dims.max(1)).rev().map(HelperTag::ArrayCopy).collect(),
            tag => vec![tag],
        }
    }

    /// Conversion helper for a row-major matrix with the given shape.
    pub fn row_major(columns: u32, rows: u32) -> Option<HelperTag> {
        match (columns, rows) {
            (2, 3) => Some(HelperTag::RowMajor2x3),
            (2, 4) => Some(HelperTag::RowMajor2x4),
            (3, 2) => Some(HelperTag::RowMajor3x2),
            (3, 4) => Some(HelperTag::RowMajor3x4),
            (4, 2) => Some(HelperTag::RowMajor4x2),
            (4, 3) => Some(HelperTag::RowMajor4x3),
            _ => None,
        }
    }

    pub fn inverse(columns: u32) -> Option<HelperTag> {
        match columns {
            2 => Some(HelperTag::Inverse2x2),
            3 => Some(HelperTag::Inverse3x3),
            4 => Some(HelperTag::Inverse4x4),
            _ => None,
        }
    }
}

const MOD: &str = r#"// Implementation of the GLSL mod() function, which is slightly different than Metal fmod()
template<typename Tx, typename Ty>
Tx mod(Tx x, Ty y)
{
    return x - y * floor(x / y);
}
"#;

const RADIANS: &str = r#"// Implementation of the GLSL radians() function
template<typename T>
T radians(T d)
{
    return d * T(0.01745329251);
}
"#;

const DEGREES: &str = r#"// Implementation of the GLSL degrees() function
template<typename T>
T degrees(T r)
{
    return r * T(57.2957795131);
}
"#;

const FIND_ILSB: &str = r#"// Implementation of the GLSL findLSB() function
template<typename T>
T findLSB(T x)
{
    return select(ctz(x), T(-1), x == T(0));
}
"#;

const FIND_SMSB: &str = r#"// Implementation of the signed GLSL findMSB() function
template<typename T>
T findSMSB(T x)
{
    T v = select(x, T(-1) - x, x < T(0));
    return select(clz(T(0)) - (clz(v) + T(1)), T(-1), v == T(0));
}
"#;

const FIND_UMSB: &str = r#"// Implementation of the unsigned GLSL findMSB() function
template<typename T>
T findUMSB(T x)
{
    return select(clz(T(0)) - (clz(x) + T(1)), T(-1), x == T(0));
}
"#;

const SSIGN: &str = r#"// Implementation of the GLSL sign() function for integer types
template<typename T, typename E = typename enable_if<is_integral<T>::value>::type>
T sign(T x)
{
    return select(select(select(x, T(0), x == T(0)), T(1), x > T(0)), T(-1), x < T(0));
}
"#;

const ARRAY_COPY_1: &str = r#"// Implementation of an array copy function to cover GLSL's ability to copy an array via assignment.
template<typename T, uint N>
void spvArrayCopyFromStack1(thread T (&dst)[N], thread const T (&src)[N])
{
    for (uint i = 0; i < N; dst[i] = src[i], i++);
}

template<typename T, uint N>
void spvArrayCopyFromConstant1(thread T (&dst)[N], constant T (&src)[N])
{
    for (uint i = 0; i < N; dst[i] = src[i], i++);
}
"#;

const DET_2X2: &str = r#"// Returns the determinant of a 2x2 matrix.
inline float spvDet2x2(float a1, float a2, float b1, float b2)
{
    return a1 * b2 - b1 * a2;
}
"#;

const INVERSE_4X4: &str = r#"// Returns the determinant of a 3x3 matrix.
inline float spvDet3x3(float a1, float a2, float a3, float b1, float b2, float b3, float c1, float c2, float c3)
{
    return a1 * spvDet2x2(b2, b3, c2, c3) - b1 * spvDet2x2(a2, a3, c2, c3) + c1 * spvDet2x2(a2, a3, b2, b3);
}

// Returns the inverse of a matrix, by using the algorithm of calculating the classical
// adjoint and dividing by the determinant. The contents of the matrix are changed.
float4x4 spvInverse4x4(float4x4 m)
{
    float4x4 adj;   // The adjoint matrix (inverse after dividing by determinant)

    // Create the transpose of the cofactors, as the classical adjoint of the matrix.
    adj[0][0] =  spvDet3x3(m[1][1], m[1][2], m[1][3], m[2][1], m[2][2], m[2][3], m[3][1], m[3][2], m[3][3]);
    adj[0][1] = -spvDet3x3(m[0][1], m[0][2], m[0][3], m[2][1], m[2][2], m[2][3], m[3][1], m[3][2], m[3][3]);
    adj[0][2] =  spvDet3x3(m[0][1], m[0][2], m[0][3], m[1][1], m[1][2], m[1][3], m[3][1], m[3][2], m[3][3]);
    adj[0][3] = -spvDet3x3(m[0][1], m[0][2], m[0][3], m[1][1], m[1][2], m[1][3], m[2][1], m[2][2], m[2][3]);

    adj[1][0] = -spvDet3x3(m[1][0], m[1][2], m[1][3], m[2][0], m[2][2], m[2][3], m[3][0], m[3][2], m[3][3]);
    adj[1][1] =  spvDet3x3(m[0][0], m[0][2], m[0][3], m[2][0], m[2][2], m[2][3], m[3][0], m[3][2], m[3][3]);
    adj[1][2] = -spvDet3x3(m[0][0], m[0][2], m[0][3], m[1][0], m[1][2], m[1][3], m[3][0], m[3][2], m[3][3]);
    adj[1][3] =  spvDet3x3(m[0][0], m[0][2], m[0][3], m[1][0], m[1][2], m[1][3], m[2][0], m[2][2], m[2][3]);

    adj[2][0] =  spvDet3x3(m[1][0], m[1][1], m[1][3], m[2][0], m[2][1], m[2][3], m[3][0], m[3][1], m[3][3]);
    adj[2][1] = -spvDet3x3(m[0][0], m[0][1], m[0][3], m[2][0], m[2][1], m[2][3], m[3][0], m[3][1], m[3][3]);
    adj[2][2] =  spvDet3x3(m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], m[3][0], m[3][1], m[3][3]);
    adj[2][3] = -spvDet3x3(m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], m[2][0], m[2][1], m[2][3]);

    adj[3][0] = -spvDet3x3(m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2], m[3][0], m[3][1], m[3][2]);
    adj[3][1] =  spvDet3x3(m[0][0], m[0][1], m[0][2], m[2][0], m[2][1], m[2][2], m[3][0], m[3][1], m[3][2]);
    adj[3][2] = -spvDet3x3(m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[3][0], m[3][1], m[3][2]);
    adj[3][3] =  spvDet3x3(m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2]);

    // Calculate the determinant as a combination of the cofactors of the first row.
    float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]) + (adj[0][2] * m[2][0]) + (adj[0][3] * m[3][0]);

    // Divide the classical adjoint matrix by the determinant.
    // If determinant is zero, matrix is not invertable, so leave it unchanged.
    return (det != 0.0f) ? (adj * (1.0f / det)) : m;
}
"#;

const INVERSE_3X3: &str = r#"// Returns the inverse of a matrix, by using the algorithm of calculating the classical
// adjoint and dividing by the determinant. The contents of the matrix are changed.
float3x3 spvInverse3x3(float3x3 m)
{
    float3x3 adj;   // The adjoint matrix (inverse after dividing by determinant)

    // Create the transpose of the cofactors, as the classical adjoint of the matrix.
    adj[0][0] =  spvDet2x2(m[1][1], m[1][2], m[2][1], m[2][2]);
    adj[0][1] = -spvDet2x2(m[0][1], m[0][2], m[2][1], m[2][2]);
    adj[0][2] =  spvDet2x2(m[0][1], m[0][2], m[1][1], m[1][2]);

    adj[1][0] = -spvDet2x2(m[1][0], m[1][2], m[2][0], m[2][2]);
    adj[1][1] =  spvDet2x2(m[0][0], m[0][2], m[2][0], m[2][2]);
    adj[1][2] = -spvDet2x2(m[0][0], m[0][2], m[1][0], m[1][2]);

    adj[2][0] =  spvDet2x2(m[1][0], m[1][1], m[2][0], m[2][1]);
    adj[2][1] = -spvDet2x2(m[0][0], m[0][1], m[2][0], m[2][1]);
    adj[2][2] =  spvDet2x2(m[0][0], m[0][1], m[1][0], m[1][1]);

    // Calculate the determinant as a combination of the cofactors of the first row.
    float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]) + (adj[0][2] * m[2][0]);

    // Divide the classical adjoint matrix by the determinant.
    // If determinant is zero, matrix is not invertable, so leave it unchanged.
    return (det != 0.0f) ? (adj * (1.0f / det)) : m;
}
"#;

const INVERSE_2X2: &str = r#"// Returns the inverse of a matrix, by using the algorithm of calculating the classical
// adjoint and dividing by the determinant. The contents of the matrix are changed.
float2x2 spvInverse2x2(float2x2 m)
{
    float2x2 adj;   // The adjoint matrix (inverse after dividing by determinant)

    // Create the transpose of the cofactors, as the classical adjoint of the matrix.
    adj[0][0] =  m[1][1];
    adj[0][1] = -m[0][1];

    adj[1][0] = -m[1][0];
    adj[1][1] =  m[0][0];

    // Calculate the determinant as a combination of the cofactors of the first row.
    float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]);

    // Divide the classical adjoint matrix by the determinant.
    // If determinant is zero, matrix is not invertable, so leave it unchanged.
    return (det != 0.0f) ? (adj * (1.0f / det)) : m;
}
"#;

/// Column expressions of each row-major conversion, by (columns, rows).
const ROW_MAJOR_COLUMNS: &[((u32, u32), &str)] = &[
    ((2, 3), "float3(m[0][0], m[0][2], m[1][1]), float3(m[0][1], m[1][0], m[1][2])"),
    ((2, 4), "float4(m[0][0], m[0][2], m[1][0], m[1][2]), float4(m[0][1], m[0][3], m[1][1], m[1][3])"),
    ((3, 2), "float2(m[0][0], m[1][1]), float2(m[0][1], m[2][0]), float2(m[1][0], m[2][1])"),
    (
        (3, 4),
        "float4(m[0][0], m[0][3], m[1][2], m[2][1]), float4(m[0][1], m[1][0], m[1][3], m[2][2]), \
         float4(m[0][2], m[1][1], m[2][0], m[2][3])",
    ),
    (
        (4, 2),
        "float2(m[0][0], m[2][0]), float2(m[0][1], m[2][1]), float2(m[1][0], m[3][0]), float2(m[1][1], m[3][1])",
    ),
    (
        (4, 3),
        "float3(m[0][0], m[1][1], m[2][2]), float3(m[0][1], m[1][2], m[3][0]), float3(m[0][2], m[2][0], m[3][1]), \
         float3(m[1][0], m[2][1], m[3][2])",
    ),
];

const TEXTURE_SWIZZLE: &str = r#"enum class spvSwizzle : uint
{
    none = 0,
    zero,
    one,
    red,
    green,
    blue,
    alpha
};

template<typename T> struct spvRemoveReference { typedef T type; };
template<typename T> struct spvRemoveReference<thread T&> { typedef T type; };
template<typename T> struct spvRemoveReference<thread T&&> { typedef T type; };
template<typename T> inline constexpr thread T&& spvForward(thread typename spvRemoveReference<T>::type& x)
{
    return static_cast<thread T&&>(x);
}
template<typename T> inline constexpr thread T&& spvForward(thread typename spvRemoveReference<T>::type&& x)
{
    return static_cast<thread T&&>(x);
}

template<typename T>
inline T spvGetSwizzle(vec<T, 4> x, T c, spvSwizzle s)
{
    switch (s)
    {
        case spvSwizzle::none:
            return c;
        case spvSwizzle::zero:
            return 0;
        case spvSwizzle::one:
            return 1;
        case spvSwizzle::red:
            return x.r;
        case spvSwizzle::green:
            return x.g;
        case spvSwizzle::blue:
            return x.b;
        case spvSwizzle::alpha:
            return x.a;
    }
}

// Wrapper function that swizzles texture samples and fetches.
template<typename T>
inline vec<T, 4> spvTextureSwizzle(vec<T, 4> x, uint s)
{
    if (!s)
        return x;
    return vec<T, 4>(spvGetSwizzle(x, x.r, spvSwizzle((s >> 0) & 0xFF)), spvGetSwizzle(x, x.g, spvSwizzle((s >> 8) & 0xFF)), spvGetSwizzle(x, x.b, spvSwizzle((s >> 16) & 0xFF)), spvGetSwizzle(x, x.a, spvSwizzle((s >> 24) & 0xFF)));
}

template<typename T>
inline T spvTextureSwizzle(T x, uint s)
{
    return spvTextureSwizzle(vec<T, 4>(x, 0, 0, 1), s).x;
}

// Wrapper function that swizzles texture gathers.
template<typename T, typename Tex, typename... Ts>
inline vec<T, 4> spvGatherSwizzle(sampler s, const thread Tex& t, Ts... params, component c, uint sw) METAL_CONST_ARG(c)
{
    if (sw)
    {
        switch (spvSwizzle((sw >> (uint(c) * 8)) & 0xFF))
        {
            case spvSwizzle::none:
                break;
            case spvSwizzle::zero:
                return vec<T, 4>(0, 0, 0, 0);
            case spvSwizzle::one:
                return vec<T, 4>(1, 1, 1, 1);
            case spvSwizzle::red:
                return t.gather(s, spvForward<Ts>(params)..., component::x);
            case spvSwizzle::green:
                return t.gather(s, spvForward<Ts>(params)..., component::y);
            case spvSwizzle::blue:
                return t.gather(s, spvForward<Ts>(params)..., component::z);
            case spvSwizzle::alpha:
                return t.gather(s, spvForward<Ts>(params)..., component::w);
        }
    }
    switch (c)
    {
        case component::x:
            return t.gather(s, spvForward<Ts>(params)..., component::x);
        case component::y:
            return t.gather(s, spvForward<Ts>(params)..., component::y);
        case component::z:
            return t.gather(s, spvForward<Ts>(params)..., component::z);
        case component::w:
            return t.gather(s, spvForward<Ts>(params)..., component::w);
    }
}

// Wrapper function that swizzles depth texture gathers.
template<typename T, typename Tex, typename... Ts>
inline vec<T, 4> spvGatherCompareSwizzle(sampler s, const thread Tex& t, Ts... params, uint sw)
{
    if (sw)
    {
        switch (spvSwizzle(sw & 0xFF))
        {
            case spvSwizzle::none:
            case spvSwizzle::red:
                break;
            case spvSwizzle::zero:
            case spvSwizzle::green:
            case spvSwizzle::blue:
            case spvSwizzle::alpha:
                return vec<T, 4>(0, 0, 0, 0);
            case spvSwizzle::one:
                return vec<T, 4>(1, 1, 1, 1);
        }
    }
    return t.gather_compare(s, spvForward<Ts>(params)...);
}
"#;

/// Source text of the nested array copy helpers for `dims >= 2`.
fn array_copy_source(dims: u32) -> String {
    let params: String = (0..dims).map(|i| format!(", uint {}", dim_letter(i))).collect();
    let extents: String = (0..dims).map(|i| format!("[{}]", dim_letter(i))).collect();
    let mut out = String::new();
    for (tag, space) in [("FromStack", "thread const"), ("FromConstant", "constant")] {
        out.push_str(&format!("template<typename T{}>\n", params));
        out.push_str(&format!(
            "void spvArrayCopy{}{}(thread T (&dst){}, {} T (&src){})\n",
            tag, dims, extents, space, extents
        ));
        out.push_str("{\n");
        out.push_str("    for (uint i = 0; i < A; i++)\n");
        out.push_str("    {\n");
        out.push_str(&format!("        spvArrayCopy{}{}(dst[i], src[i]);\n", tag, dims - 1));
        out.push_str("    }\n");
        out.push_str("}\n\n");
    }
    // The trailing blank line is added by the caller.
    out.truncate(out.len() - 1);
    out
}

fn dim_letter(index: u32) -> char {
    (b'A' + index as u8) as char
}

fn row_major_source(columns: u32, rows: u32) -> String {
    let body = ROW_MAJOR_COLUMNS
        .iter()
        .find(|(shape, _)| *shape == (columns, rows))
        .map(|(_, body)| *body)
        .unwrap_or("");
    let ty = format!("float{}x{}", columns, rows);
    format!(
        "// Implementation of a conversion of matrix content from RowMajor to ColumnMajor organization.\n\
         {ty} spvConvertFromRowMajor{c}x{r}({ty} m)\n{{\n    return {ty}({body});\n}}\n",
        ty = ty,
        c = columns,
        r = rows,
        body = body
    )
}

impl CompilerMsl {
    /// Source text of one helper, ending with a newline.
    pub(crate) fn helper_source(&self, tag: HelperTag) -> String {
        match tag {
            HelperTag::Mod => MOD.to_string(),
            HelperTag::Radians => RADIANS.to_string(),
            HelperTag::Degrees => DEGREES.to_string(),
            HelperTag::FindILsb => FIND_ILSB.to_string(),
            HelperTag::FindSMsb => FIND_SMSB.to_string(),
            HelperTag::FindUMsb => FIND_UMSB.to_string(),
            HelperTag::SSign => SSIGN.to_string(),
            HelperTag::ArrayCopy(1) => ARRAY_COPY_1.to_string(),
            HelperTag::ArrayCopy(dims) => array_copy_source(dims),
            HelperTag::TexelBufferCoords => {
                let width = self.options.texel_buffer_texture_width;
                format!(
                    "// Returns 2D texture coords corresponding to 1D texel buffer coords\n\
                     uint2 spvTexelBufferCoord(uint tc)\n{{\n    return uint2(tc % {w}, tc / {w});\n}}\n",
                    w = width
                )
            }
            HelperTag::Inverse4x4 => format!("{}\n{}", DET_2X2, INVERSE_4X4),
            HelperTag::Inverse3x3 => {
                // spvDet2x2 is already part of the 4x4 inverse.
                if self.session.has_helper(HelperTag::Inverse4x4) {
                    INVERSE_3X3.to_string()
                } else {
                    format!("{}\n{}", DET_2X2, INVERSE_3X3)
                }
            }
            HelperTag::Inverse2x2 => INVERSE_2X2.to_string(),
            HelperTag::RowMajor2x3 => row_major_source(2, 3),
            HelperTag::RowMajor2x4 => row_major_source(2, 4),
            HelperTag::RowMajor3x2 => row_major_source(3, 2),
            HelperTag::RowMajor3x4 => row_major_source(3, 4),
            HelperTag::RowMajor4x2 => row_major_source(4, 2),
            HelperTag::RowMajor4x3 => row_major_source(4, 3),
            HelperTag::TextureSwizzle => TEXTURE_SWIZZLE.to_string(),
        }
    }

    /// Emit every registered helper in catalog order, each followed by a
    /// blank line.
    pub(crate) fn emit_helpers(&mut self) {
        let tags: Vec<HelperTag> = self.session.helpers().collect();
        for tag in tags {
            trace!("emitting helper {:?}", tag);
            let source = self.helper_source(tag);
            for line in source.lines() {
                self.statement(line);
            }
            self.statement("");
        }
    }
}
