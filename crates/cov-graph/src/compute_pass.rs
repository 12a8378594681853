use std::{ffi::CString, path::Path};

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::ComputeBackend,
    error::{GraphError, GraphResult},
    handles::{MappingId, PassId},
    instance::{Instance, PassDecl},
    state::BufferState,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;
/// magic, version, generator, bound, schema
const SPIRV_HEADER_WORDS: usize = 5;

/// 校验 SPIR-V 并转换为 words
///
/// 长度必须是 4 的倍数，并且以 magic number 开头；大端序的二进制会被转换为本机字节序
pub fn parse_spirv(bytes: &[u8]) -> GraphResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(GraphError::InvalidSpirv(format!("byte length {} is not a multiple of 4", bytes.len())));
    }
    if bytes.len() < SPIRV_HEADER_WORDS * 4 {
        return Err(GraphError::InvalidSpirv(format!("{} bytes is shorter than the SPIR-V header", bytes.len())));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != SPIRV_MAGIC && magic != SPIRV_MAGIC.swap_bytes() {
        return Err(GraphError::InvalidSpirv(format!("bad magic number {:#010x}", magic)));
    }

    ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(|e| GraphError::InvalidSpirv(e.to_string()))
}

/// 单个 specialization constant 在数据块中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecEntry {
    pub constant_id: u32,
    pub offset: u32,
    pub size: usize,
}

/// specialization constants，所有值紧密排列在同一个数据块中
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecConstants {
    entries: Vec<SpecEntry>,
    data: Vec<u8>,
}

impl SpecConstants {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个常量，`constant_id` 不能重复
    ///
    /// shader 中的 bool 常量需要使用 u32
    pub fn add<T: bytemuck::Pod>(&mut self, constant_id: u32, value: T) -> GraphResult<&mut Self> {
        if self.entries.iter().any(|e| e.constant_id == constant_id) {
            return Err(GraphError::DuplicateSpecConstant(constant_id));
        }
        let bytes = bytemuck::bytes_of(&value);
        self.entries.push(SpecEntry {
            constant_id,
            offset: self.data.len() as u32,
            size: bytes.len(),
        });
        self.data.extend_from_slice(bytes);
        Ok(self)
    }

    /// builder 形式的 [`Self::add`]
    pub fn with<T: bytemuck::Pod>(mut self, constant_id: u32, value: T) -> GraphResult<Self> {
        self.add(constant_id, value)?;
        Ok(self)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[SpecEntry] {
        &self.entries
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn map_entries(&self) -> Vec<vk::SpecializationMapEntry> {
        self.entries
            .iter()
            .map(|e| vk::SpecializationMapEntry {
                constant_id: e.constant_id,
                offset: e.offset,
                size: e.size,
            })
            .collect_vec()
    }
}

/// 已经通过校验的 compute pass 声明
#[derive(Clone, Debug)]
pub(crate) struct ComputePassDecl {
    pub inputs: Vec<MappingId>,
    pub outputs: Vec<MappingId>,
    pub workgroup_dims: glam::UVec3,
    pub shader: Vec<u32>,
    pub entry_point: CString,
    pub spec_constants: SpecConstants,
}

impl ComputePassDecl {
    /// descriptor set 的绑定顺序：先 inputs 后 outputs，重复的 mapping 也各占一个 set
    pub fn bindings(&self) -> impl Iterator<Item = MappingId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }

    /// 去重之后的访问方式，顺序和 `bindings` 中第一次出现的位置一致
    pub fn accesses(&self) -> Vec<(MappingId, BufferState)> {
        self.bindings()
            .unique()
            .map(|m| {
                let read = self.inputs.contains(&m);
                let write = self.outputs.contains(&m);
                let state = match (read, write) {
                    (true, true) => BufferState::STORAGE_READ_WRITE_COMPUTE,
                    (false, true) => BufferState::STORAGE_WRITE_COMPUTE,
                    _ => BufferState::STORAGE_READ_COMPUTE,
                };
                (m, state)
            })
            .collect_vec()
    }
}

/// compute pass 的构建器
///
/// 顺序任意地设置 inputs，outputs，workgroup 维度以及 shader，最后调用 `build`。
/// `build` 只做校验并登记到 instance 中，pipeline 的创建和命令录制在 [`Instance::finalize`] 中完成。
///
/// # 使用示例
/// ```ignore
/// let pass = instance
///     .add_compute_pass()
///     .name("add")
///     .set_inputs([a, b])
///     .set_outputs([c])
///     .set_workgroup_dims(16, 1, 1)
///     .load_shader_from_file("shaders/add.spv")?
///     .build()?;
/// ```
pub struct ComputePassBuilder<'a, B: ComputeBackend> {
    instance: &'a mut Instance<B>,
    name: Option<String>,
    inputs: Vec<MappingId>,
    outputs: Vec<MappingId>,
    workgroup_dims: glam::UVec3,
    shader: Option<Vec<u32>>,
    entry_point: String,
    spec_constants: SpecConstants,
}

impl<'a, B: ComputeBackend> ComputePassBuilder<'a, B> {
    pub(crate) fn new(instance: &'a mut Instance<B>) -> Self {
        Self {
            instance,
            name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            workgroup_dims: glam::UVec3::ONE,
            shader: None,
            entry_point: "main".to_string(),
            spec_constants: SpecConstants::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 覆盖之前设置的 inputs
    pub fn set_inputs(mut self, inputs: impl IntoIterator<Item = MappingId>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    /// 覆盖之前设置的 outputs
    pub fn set_outputs(mut self, outputs: impl IntoIterator<Item = MappingId>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn set_workgroup_dims(mut self, x: u32, y: u32, z: u32) -> Self {
        self.workgroup_dims = glam::uvec3(x, y, z);
        self
    }

    pub fn load_bin_shader(mut self, bytes: &[u8]) -> GraphResult<Self> {
        self.shader = Some(parse_spirv(bytes)?);
        Ok(self)
    }

    pub fn load_shader_from_file(self, path: impl AsRef<Path>) -> GraphResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| GraphError::ShaderIo {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("load shader {:?}, {} bytes", path, bytes.len());
        self.load_bin_shader(&bytes)
    }

    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn specialization(mut self, spec_constants: SpecConstants) -> Self {
        self.spec_constants = spec_constants;
        self
    }

    pub fn build(self) -> GraphResult<PassId> {
        let name = self.name.unwrap_or_else(|| self.instance.default_pass_name("compute"));

        let shader = self.shader.ok_or_else(|| GraphError::MissingShader { pass: name.clone() })?;

        let dims = self.workgroup_dims;
        if dims.min_element() == 0 {
            return Err(GraphError::InvalidWorkgroupDims { dims });
        }
        let limit = self.instance.limits().max_compute_work_group_count;
        if dims.cmpgt(limit).any() {
            return Err(GraphError::WorkgroupDimsExceedLimit { dims, limit });
        }

        let entry_point =
            CString::new(self.entry_point.as_str()).map_err(|_| GraphError::InvalidEntryPoint(self.entry_point.clone()))?;

        for mapping in self.inputs.iter().chain(self.outputs.iter()) {
            self.instance.mapping(*mapping)?;
        }

        let decl = ComputePassDecl {
            inputs: self.inputs,
            outputs: self.outputs,
            workgroup_dims: dims,
            shader,
            entry_point,
            spec_constants: self.spec_constants,
        };
        self.instance.declare_pass(name, PassDecl::Compute(decl))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 只有 header 的 SPIR-V，足够通过校验
    pub(crate) fn spirv_header_bytes() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0].iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_spirv_little_endian() {
        let words = parse_spirv(&spirv_header_bytes()).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_parse_spirv_big_endian() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0].iter().flat_map(|w| w.to_be_bytes()).collect();
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[1], 0x0001_0000);
    }

    #[test]
    fn test_parse_spirv_rejects_bad_input() {
        let mut bytes = spirv_header_bytes();
        bytes.push(0);
        assert!(matches!(parse_spirv(&bytes), Err(GraphError::InvalidSpirv(_))));

        assert!(matches!(parse_spirv(&[]), Err(GraphError::InvalidSpirv(_))));
        assert!(matches!(parse_spirv(&[0x03, 0x02, 0x23, 0x07]), Err(GraphError::InvalidSpirv(_))));

        let mut bytes = spirv_header_bytes();
        bytes[0] = 0xff;
        assert!(matches!(parse_spirv(&bytes), Err(GraphError::InvalidSpirv(_))));
    }

    #[test]
    fn test_spec_constants_layout() {
        let spec = SpecConstants::new().with(0, 16u32).unwrap().with(3, 0.5f32).unwrap().with(7, 9u64).unwrap();

        assert_eq!(
            spec.entries(),
            &[
                SpecEntry {
                    constant_id: 0,
                    offset: 0,
                    size: 4
                },
                SpecEntry {
                    constant_id: 3,
                    offset: 4,
                    size: 4
                },
                SpecEntry {
                    constant_id: 7,
                    offset: 8,
                    size: 8
                },
            ]
        );
        assert_eq!(spec.data().len(), 16);
        assert_eq!(&spec.data()[0..4], &16u32.to_ne_bytes());
        assert_eq!(&spec.data()[4..8], &0.5f32.to_ne_bytes());

        let map_entries = spec.map_entries();
        assert_eq!(map_entries[2].constant_id, 7);
        assert_eq!(map_entries[2].offset, 8);
        assert_eq!(map_entries[2].size, 8);
    }

    #[test]
    fn test_spec_constants_reject_duplicates() {
        let mut spec = SpecConstants::new();
        spec.add(1, 1u32).unwrap();
        assert!(matches!(spec.add(1, 2u32), Err(GraphError::DuplicateSpecConstant(1))));
        assert_eq!(spec.entries().len(), 1);
    }
}
