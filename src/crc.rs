/*!
    CRC32 as computed by the STM32 CRC unit

    polynomial 0x04C11DB7, fed with little endian 32 bit words, no reflection and no final xor.
    Host and nodes must compute bit-identical values since each side checks the other's checksums.
*/

/// initial value of every checksum exchanged on the bus
pub const SEED: u32 = 0xFFFF_FFFF;

const TABLE: [u32; 16] = [
    0x0000_0000, 0x04C1_1DB7, 0x0982_3B6E, 0x0D43_26D9, 0x1304_76DC, 0x17C5_6B6B, 0x1A86_4DB2, 0x1E47_5005,
    0x2608_EDB8, 0x22C9_F00F, 0x2F8A_D6D6, 0x2B4B_CB61, 0x350C_9B64, 0x31CD_86D3, 0x3C8E_A00A, 0x384F_BDBD,
    ];

/**
    checksum of `data` starting from `seed`

    data is consumed as little endian words, a trailing partial word is padded with zeros
*/
pub fn crc32(seed: u32, data: &[u8]) -> u32 {
    let mut crc = Crc32::with_seed(seed);
    crc.update(data);
    crc.value()
}

/// streaming checksum, for data that is produced or consumed word by word
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Crc32 {
    value: u32,
}
impl Default for Crc32 {
    fn default() -> Self {Self::new()}
}
impl Crc32 {
    pub const fn new() -> Self {Self::with_seed(SEED)}
    pub const fn with_seed(seed: u32) -> Self {Self {value: seed}}

    pub fn update_word(&mut self, word: u32) {
        let mut crc = self.value ^ word;
        for _ in 0 .. 8 {
            crc = (crc << 4) ^ TABLE[(crc >> 28) as usize];
        }
        self.value = crc;
    }
    pub fn update(&mut self, data: &[u8]) {
        let mut words = data.chunks_exact(4);
        for word in &mut words {
            self.update_word(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }
        let rest = words.remainder();
        if !rest.is_empty() {
            let mut word = [0; 4];
            word[.. rest.len()].copy_from_slice(rest);
            self.update_word(u32::from_le_bytes(word));
        }
    }
    pub fn value(&self) -> u32 {self.value}
}
