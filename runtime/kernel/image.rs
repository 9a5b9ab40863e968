//! ELF subset loader for kernel images: little-endian ELF32 executables
//! carrying an OpenRISC machine tag. Loadable segments are copied into the
//! kernel memory window, the rest of the window is zeroed (BSS), and the
//! entry points are resolved from the symbol table.

use alloc::string::String;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

pub const EM_OPENRISC: u16 = 92;

const ET_EXEC:  u16 = 2;
const PT_LOAD:  u32 = 1;
const SHT_SYMTAB: u32 = 2;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE:  usize = 16;

#[derive(Fail, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[fail(display = "truncated image")]
    Truncated,
    #[fail(display = "not an ELF image")]
    BadMagic,
    #[fail(display = "unsupported ELF class or byte order")]
    BadFormat,
    #[fail(display = "wrong machine type {}", _0)]
    BadMachine(u16),
    #[fail(display = "not an executable image (type {})", _0)]
    BadType(u16),
    #[fail(display = "misaligned segment at {:#010x}", _0)]
    Misaligned(u32),
    #[fail(display = "segment at {:#010x} does not fit the kernel window", _0)]
    TooLarge(u32),
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16, Error> {
    data.get(offset..offset + 2)
        .map(LittleEndian::read_u16)
        .ok_or(Error::Truncated)
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32, Error> {
    data.get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or(Error::Truncated)
}

/// Entry points resolved from a loaded image.
#[derive(Debug, PartialEq)]
pub struct Loaded {
    entries: Vec<(String, u32)>
}

impl Loaded {
    pub fn entry(&self, name: &str) -> Option<u32> {
        self.entries.iter()
            .find(|(entry, _)| entry.as_str() == name)
            .map(|&(_, addr)| addr)
    }
}

pub fn load(image: &[u8], window: &mut [u8], window_base: u32,
            wanted: &[&str]) -> Result<Loaded, Error> {
    if image.len() < EHDR_SIZE {
        return Err(Error::Truncated)
    }
    if &image[0..4] != b"\x7fELF" {
        return Err(Error::BadMagic)
    }
    // ELFCLASS32, ELFDATA2LSB
    if image[4] != 1 || image[5] != 1 {
        return Err(Error::BadFormat)
    }

    let e_type = u16_at(image, 16)?;
    if e_type != ET_EXEC {
        return Err(Error::BadType(e_type))
    }
    let e_machine = u16_at(image, 18)?;
    if e_machine != EM_OPENRISC {
        return Err(Error::BadMachine(e_machine))
    }

    let e_phoff     = u32_at(image, 28)? as usize;
    let e_shoff     = u32_at(image, 32)? as usize;
    let e_phentsize = u16_at(image, 42)? as usize;
    let e_phnum     = u16_at(image, 44)? as usize;
    let e_shentsize = u16_at(image, 46)? as usize;
    let e_shnum     = u16_at(image, 48)? as usize;

    if e_phentsize < PHDR_SIZE || (e_shnum > 0 && e_shentsize < SHDR_SIZE) {
        return Err(Error::BadFormat)
    }

    for byte in window.iter_mut() {
        *byte = 0
    }

    for index in 0..e_phnum {
        let phdr = e_phoff + index * e_phentsize;
        if u32_at(image, phdr)? != PT_LOAD {
            continue
        }
        let p_offset = u32_at(image, phdr + 4)? as usize;
        let p_vaddr  = u32_at(image, phdr + 8)?;
        let p_filesz = u32_at(image, phdr + 16)? as usize;
        let p_memsz  = u32_at(image, phdr + 20)? as usize;

        if p_vaddr % 4 != 0 {
            return Err(Error::Misaligned(p_vaddr))
        }
        if p_vaddr < window_base {
            return Err(Error::TooLarge(p_vaddr))
        }
        let load_at = (p_vaddr - window_base) as usize;
        if p_filesz > p_memsz || load_at + p_memsz > window.len() {
            return Err(Error::TooLarge(p_vaddr))
        }
        let segment = image.get(p_offset..p_offset + p_filesz)
            .ok_or(Error::Truncated)?;
        window[load_at..load_at + p_filesz].copy_from_slice(segment);
        // p_memsz beyond p_filesz is BSS, already zeroed with the window
    }

    let mut entries = Vec::new();
    for index in 0..e_shnum {
        let shdr = e_shoff + index * e_shentsize;
        if u32_at(image, shdr + 4)? != SHT_SYMTAB {
            continue
        }
        let sh_offset = u32_at(image, shdr + 16)? as usize;
        let sh_size   = u32_at(image, shdr + 20)? as usize;
        let sh_link   = u32_at(image, shdr + 24)? as usize;

        let strtab_shdr = e_shoff + sh_link * e_shentsize;
        let strtab_off  = u32_at(image, strtab_shdr + 16)? as usize;
        let strtab_size = u32_at(image, strtab_shdr + 20)? as usize;
        let strtab = image.get(strtab_off..strtab_off + strtab_size)
            .ok_or(Error::Truncated)?;

        for sym_index in 0..sh_size / SYM_SIZE {
            let sym = sh_offset + sym_index * SYM_SIZE;
            let st_name  = u32_at(image, sym)? as usize;
            let st_value = u32_at(image, sym + 4)?;

            let name = strtab.get(st_name..)
                .and_then(|tail| tail.split(|&byte| byte == 0).next())
                .and_then(|name| core::str::from_utf8(name).ok());
            if let Some(name) = name {
                if wanted.contains(&name) {
                    entries.push((String::from(name), st_value))
                }
            }
        }
    }

    Ok(Loaded { entries })
}

#[cfg(test)]
pub mod tests {
    use super::*;

    // Assembles a minimal executable: one text segment and a symbol table
    // exporting `run_kernel`.
    pub fn test_image(window_base: u32) -> Vec<u8> {
        let text = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x00, 0x00, 0x00];
        let strtab = b"\0run_kernel\0";

        let e_phoff = EHDR_SIZE;
        let e_shoff = e_phoff + PHDR_SIZE;
        let text_off = e_shoff + 3 * SHDR_SIZE;
        let symtab_off = text_off + text.len();
        let strtab_off = symtab_off + 2 * SYM_SIZE;

        let mut image = vec![0u8; strtab_off + strtab.len()];
        image[0..4].copy_from_slice(b"\x7fELF");
        image[4] = 1;  // ELFCLASS32
        image[5] = 1;  // ELFDATA2LSB
        image[6] = 1;  // EV_CURRENT
        LittleEndian::write_u16(&mut image[16..], ET_EXEC);
        LittleEndian::write_u16(&mut image[18..], EM_OPENRISC);
        LittleEndian::write_u32(&mut image[24..], window_base);
        LittleEndian::write_u32(&mut image[28..], e_phoff as u32);
        LittleEndian::write_u32(&mut image[32..], e_shoff as u32);
        LittleEndian::write_u16(&mut image[42..], PHDR_SIZE as u16);
        LittleEndian::write_u16(&mut image[44..], 1);
        LittleEndian::write_u16(&mut image[46..], SHDR_SIZE as u16);
        LittleEndian::write_u16(&mut image[48..], 3);

        {
            let phdr = &mut image[e_phoff..e_phoff + PHDR_SIZE];
            LittleEndian::write_u32(&mut phdr[0..], PT_LOAD);
            LittleEndian::write_u32(&mut phdr[4..], text_off as u32);
            LittleEndian::write_u32(&mut phdr[8..], window_base);
            LittleEndian::write_u32(&mut phdr[16..], text.len() as u32);
            LittleEndian::write_u32(&mut phdr[20..], text.len() as u32 + 16);
        }

        // section 0 reserved; section 1 symtab; section 2 strtab
        {
            let shdr = e_shoff + SHDR_SIZE;
            LittleEndian::write_u32(&mut image[shdr + 4..shdr + 8], SHT_SYMTAB);
            LittleEndian::write_u32(&mut image[shdr + 16..shdr + 20], symtab_off as u32);
            LittleEndian::write_u32(&mut image[shdr + 20..shdr + 24], (2 * SYM_SIZE) as u32);
            LittleEndian::write_u32(&mut image[shdr + 24..shdr + 28], 2);
        }
        {
            let shdr = e_shoff + 2 * SHDR_SIZE;
            LittleEndian::write_u32(&mut image[shdr + 4..shdr + 8], 3);  // SHT_STRTAB
            LittleEndian::write_u32(&mut image[shdr + 16..shdr + 20], strtab_off as u32);
            LittleEndian::write_u32(&mut image[shdr + 20..shdr + 24], strtab.len() as u32);
        }

        {
            let sym = symtab_off + SYM_SIZE;  // symbol 0 reserved
            LittleEndian::write_u32(&mut image[sym..sym + 4], 1);  // offset of "run_kernel"
            LittleEndian::write_u32(&mut image[sym + 4..sym + 8], window_base);
        }

        image[text_off..text_off + text.len()].copy_from_slice(&text);
        image[strtab_off..strtab_off + strtab.len()].copy_from_slice(strtab);
        image
    }

    const BASE: u32 = 0x4080_0000;

    #[test]
    fn loads_and_resolves_entry() {
        let image = test_image(BASE);
        let mut window = vec![0xffu8; 256];
        let loaded = load(&image, &mut window, BASE, &["run_kernel"]).unwrap();
        assert_eq!(loaded.entry("run_kernel"), Some(BASE));
        assert_eq!(loaded.entry("finalize"), None);
        assert_eq!(&window[0..4], &[0xde, 0xad, 0xbe, 0xef]);
        // BSS zeroed
        assert!(window[8..24].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn rejects_junk() {
        let mut window = vec![0u8; 256];
        assert_eq!(load(&[0x12; 12], &mut window, BASE, &[]),
                   Err(Error::Truncated));

        let mut junk = vec![0u8; EHDR_SIZE];
        junk[0..4].copy_from_slice(b"\x7fEL!");
        assert_eq!(load(&junk, &mut window, BASE, &[]), Err(Error::BadMagic));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut image = test_image(BASE);
        LittleEndian::write_u16(&mut image[18..], 3);  // EM_386
        let mut window = vec![0u8; 256];
        assert_eq!(load(&image, &mut window, BASE, &[]),
                   Err(Error::BadMachine(3)));
    }

    #[test]
    fn rejects_oversized_segment() {
        let image = test_image(BASE);
        let mut window = vec![0u8; 16];
        assert_eq!(load(&image, &mut window, BASE, &["run_kernel"]),
                   Err(Error::TooLarge(BASE)));
    }
}
