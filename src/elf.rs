//! Guest ELF loading and riscv-arch-test signature dumping.

use std::fs;
use std::io::Write;
use std::path::Path;

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::{
    header::{self, ELFCLASS64, ELFDATA2LSB, EM_RISCV, ET_DYN, ET_EXEC},
    Elf,
};

use crate::memory::Dram;
use crate::EmulatorError;

/// Load every PT_LOAD segment into DRAM and return the entry PC.
pub fn load(path: &Path, dram: &mut Dram) -> Result<u64, EmulatorError> {
    let bytes = fs::read(path)?;
    let elf = Elf::parse(&bytes)?;
    validate_header(&elf)?;

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        let file_off = ph.p_offset as usize;
        let file_sz = ph.p_filesz as usize;
        let end = file_off
            .checked_add(file_sz)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| {
                EmulatorError::InvalidElf(format!(
                    "segment outside file: off={file_off:#x} size={file_sz:#x}"
                ))
            })?;
        if ph.p_memsz < ph.p_filesz {
            return Err(EmulatorError::InvalidElf(format!(
                "p_memsz < p_filesz for segment at off={file_off:#x}"
            )));
        }

        let paddr = ph.p_paddr;
        dram.write_bytes(paddr, &bytes[file_off..end])?;

        // Zero-fill the bss tail.
        let bss = (ph.p_memsz - ph.p_filesz) as usize;
        if bss > 0 {
            dram.write_bytes(paddr + ph.p_filesz, &vec![0u8; bss])?;
        }

        log::debug!(
            "loaded segment pa={paddr:#x} filesz={:#x} memsz={:#x}",
            ph.p_filesz,
            ph.p_memsz
        );
    }

    log::info!("ELF loaded: {} entry={:#x}", path.display(), elf.entry);
    Ok(elf.entry)
}

fn validate_header(elf: &Elf) -> Result<(), EmulatorError> {
    if elf.header.e_ident[header::EI_CLASS] != ELFCLASS64 {
        return Err(EmulatorError::InvalidElf("expected 64-bit ELF".into()));
    }
    if elf.header.e_ident[header::EI_DATA] != ELFDATA2LSB {
        return Err(EmulatorError::InvalidElf(
            "expected little-endian ELF".into(),
        ));
    }
    if elf.header.e_machine != EM_RISCV {
        return Err(EmulatorError::InvalidElf("expected RISC-V ELF".into()));
    }
    if elf.header.e_type != ET_EXEC && elf.header.e_type != ET_DYN {
        return Err(EmulatorError::InvalidElf(
            "unsupported ELF type (want ET_EXEC or ET_DYN)".into(),
        ));
    }
    Ok(())
}

/// Look up a symbol's value in the ELF symbol table.
pub fn find_symbol(path: &Path, name: &str) -> Result<u64, EmulatorError> {
    let bytes = fs::read(path)?;
    let elf = Elf::parse(&bytes)?;

    for sym in elf.syms.iter() {
        if elf.strtab.get_at(sym.st_name) == Some(name) {
            return Ok(sym.st_value);
        }
    }
    Err(EmulatorError::MissingSymbol(name.to_string()))
}

/// Dump the memory between `begin_signature` and `end_signature` as
/// little-endian words, one 8-digit hex line each (riscv-arch-test format).
pub fn dump_signature(
    elf_path: &Path,
    sig_path: &Path,
    dram: &Dram,
) -> Result<(), EmulatorError> {
    let begin = find_symbol(elf_path, "begin_signature")?;
    let end = find_symbol(elf_path, "end_signature")?;
    if end < begin {
        return Err(EmulatorError::InvalidElf(
            "end_signature precedes begin_signature".into(),
        ));
    }

    let mut data = vec![0u8; (end - begin) as usize];
    dram.read_bytes(begin, &mut data)?;

    let mut out = fs::File::create(sig_path)?;
    for word in data.chunks(4) {
        let mut raw = [0u8; 4];
        raw[..word.len()].copy_from_slice(word);
        writeln!(out, "{:08x}", u32::from_le_bytes(raw))?;
    }

    log::info!(
        "signature dumped: [{begin:#x}, {end:#x}) -> {}",
        sig_path.display()
    );
    Ok(())
}
