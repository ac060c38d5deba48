//! Lifting pipeline: Mach-O -> recovered module -> IR.

use tracing::{debug, info};

use odis_cfg::{DisasmStats, LoadedImage, Module, ObjectDisassembler};
use odis_ir::ModuleIr;
use odis_isa::CapstoneDecoder;
use odis_macho::StubSymbolizer;

use crate::Result;

/// One loaded image plus the collaborators needed to disassemble it.
pub struct Pipeline {
    image: LoadedImage,
    symbolizer: StubSymbolizer,
    decoder: CapstoneDecoder,
}

impl Pipeline {
    /// Load a Mach-O file and set up the decoder and symbolizer for its
    /// architecture.
    pub fn load(data: &[u8], slide: u64) -> Result<Self> {
        let image = odis_macho::load(data, slide)?;
        let symbolizer = StubSymbolizer::from_macho(data)?;
        debug!(stubs = symbolizer.len(), "import stubs resolved");
        let decoder = CapstoneDecoder::new(image.arch)?;
        Ok(Self {
            image,
            symbolizer,
            decoder,
        })
    }

    pub fn image(&self) -> &LoadedImage {
        &self.image
    }

    pub fn symbolizer(&self) -> &StubSymbolizer {
        &self.symbolizer
    }

    /// Recover the module. With `with_cfg`, symbol-seeded recursive
    /// disassembly; without, a linear section sweep.
    pub fn disassemble(&self, with_cfg: bool) -> Result<(Module, DisasmStats)> {
        let mut dis =
            ObjectDisassembler::new(&self.image, &self.decoder).with_symbolizer(&self.symbolizer);
        let module = dis.build_module(with_cfg)?;
        let stats = dis.stats();
        info!(
            functions = module.function_count(),
            atoms = module.atom_count(),
            translated = stats.translated,
            uniqued = stats.uniqued,
            "module built"
        );
        Ok((module, stats))
    }

    /// Recover the module and lower it to IR.
    pub fn lift(&self, with_cfg: bool) -> Result<(ModuleIr, DisasmStats)> {
        let (module, stats) = self.disassemble(with_cfg)?;
        Ok((odis_ir::lower(&module), stats))
    }
}
