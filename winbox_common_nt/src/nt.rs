// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! User-mode process structures of 64-bit Windows.
//!
//! Layouts follow the public x86-64 definitions (ntpsapi.h and friends).
//! Offsets are pinned by `const` assertions at the bottom of this file.
//! Every structure is padding-free under `#[repr(C)]`: explicit `PaddingN`
//! fields stand in for what the compiler would otherwise insert, which is
//! what allows the byte-level derives to hold.
//!
//! Guest pointers are `u64` fields. None of these types ever holds a host
//! pointer.

#![allow(non_snake_case)]

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::struct_layout;

/// Counted UTF-16 string header (`UNICODE_STRING`).
///
/// `Length` and `MaximumLength` are in bytes; `Buffer` is a guest address.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct UnicodeString {
    pub Length: u16,
    pub MaximumLength: u16,
    pub Padding0: [u8; 4],
    pub Buffer: u64,
}

struct_layout!(UnicodeString, "UNICODE_STRING", [Length, MaximumLength, Buffer]);

/// Counted ANSI string header (`STRING`). Same shape as [`UnicodeString`].
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct AnsiString {
    pub Length: u16,
    pub MaximumLength: u16,
    pub Padding0: [u8; 4],
    pub Buffer: u64,
}

/// `CLIENT_ID`: process and thread id as handle-sized values.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ClientId {
    pub UniqueProcess: u64,
    pub UniqueThread: u64,
}

/// `NT_TIB`, the architectural head of the TEB.
///
/// `Self_` (Windows: `Self`) must hold the guest address of this very
/// structure once it is materialized in guest memory.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct NtTib {
    pub ExceptionList: u64,
    pub StackBase: u64,
    pub StackLimit: u64,
    pub SubSystemTib: u64,
    pub FiberData: u64,
    pub ArbitraryUserPointer: u64,
    pub Self_: u64,
}

struct_layout!(NtTib, "NT_TIB", [
    ExceptionList,
    StackBase,
    StackLimit,
    SubSystemTib,
    FiberData,
    ArbitraryUserPointer,
    Self_ as "Self",
]);

/// Thread Environment Block, 64-bit layout (0x1838 bytes).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct Teb {
    pub NtTib: NtTib,
    pub EnvironmentPointer: u64,
    pub ClientId: ClientId,
    pub ActiveRpcHandle: u64,
    pub ThreadLocalStoragePointer: u64,
    pub ProcessEnvironmentBlock: u64,
    pub LastErrorValue: u32,
    pub CountOfOwnedCriticalSections: u32,
    pub CsrClientThread: u64,
    pub Win32ThreadInfo: u64,
    pub User32Reserved: [u32; 26],
    pub UserReserved: [u32; 5],
    pub Padding0: [u8; 4],
    pub Wow32Reserved: u64,
    pub CurrentLocale: u32,
    pub FpSoftwareStatusRegister: u32,
    pub ReservedForDebuggerInstrumentation: [u64; 16],
    pub SystemReserved1: [u64; 30],
    pub PlaceholderCompatibilityMode: u8,
    pub PlaceholderHydrationAlwaysExplicit: u8,
    pub PlaceholderReserved: [u8; 10],
    pub ProxiedProcessId: u32,
    pub ActivationStack: [u8; 0x28],
    pub WorkingOnBehalfTicket: [u8; 8],
    pub ExceptionCode: i32,
    pub Padding1: [u8; 4],
    pub ActivationContextStackPointer: u64,
    pub InstrumentationCallbackSp: u64,
    pub InstrumentationCallbackPreviousPc: u64,
    pub InstrumentationCallbackPreviousSp: u64,
    pub TxFsContext: u32,
    pub InstrumentationCallbackDisabled: u8,
    pub UnalignedLoadStoreExceptions: u8,
    pub Padding2: [u8; 2],
    pub GdiTebBatch: [u8; 0x4E8],
    pub RealClientId: ClientId,
    pub GdiCachedProcessHandle: u64,
    pub GdiClientPID: u32,
    pub GdiClientTID: u32,
    pub GdiThreadLocalInfo: u64,
    pub Win32ClientInfo: [u64; 62],
    pub glDispatchTable: [u64; 233],
    pub glReserved1: [u64; 29],
    pub glReserved2: u64,
    pub glSectionInfo: u64,
    pub glSection: u64,
    pub glTable: u64,
    pub glCurrentRC: u64,
    pub glContext: u64,
    pub LastStatusValue: u32,
    pub Padding3: [u8; 4],
    pub StaticUnicodeString: UnicodeString,
    pub StaticUnicodeBuffer: [u16; 261],
    pub Padding4: [u8; 6],
    pub DeallocationStack: u64,
    pub TlsSlots: [u64; 64],
    pub TlsLinks: [u64; 2],
    pub Vdm: u64,
    pub ReservedForNtRpc: u64,
    pub DbgSsReserved: [u64; 2],
    pub HardErrorMode: u32,
    pub Padding5: [u8; 4],
    pub Instrumentation: [u64; 11],
    pub ActivityId: [u8; 16],
    pub SubProcessTag: u64,
    pub PerflibData: u64,
    pub EtwTraceData: u64,
    pub WinSockData: u64,
    pub GdiBatchCount: u32,
    pub CurrentIdealProcessor: u32,
    pub GuaranteedStackBytes: u32,
    pub Padding6: [u8; 4],
    pub ReservedForPerf: u64,
    pub ReservedForOle: u64,
    pub WaitingOnLoaderLock: u32,
    pub Padding7: [u8; 4],
    pub SavedPriorityState: u64,
    pub ReservedForCodeCoverage: u64,
    pub ThreadPoolData: u64,
    pub TlsExpansionSlots: u64,
    pub DeallocationBStore: u64,
    pub BStoreLimit: u64,
    pub MuiGeneration: u32,
    pub IsImpersonating: u32,
    pub NlsCache: u64,
    pub pShimData: u64,
    pub HeapData: u32,
    pub Padding8: [u8; 4],
    pub CurrentTransactionHandle: u64,
    pub ActiveFrame: u64,
    pub FlsData: u64,
    pub PreferredLanguages: u64,
    pub UserPrefLanguages: u64,
    pub MergedPrefLanguages: u64,
    pub MuiImpersonation: u32,
    pub CrossTebFlags: u16,
    pub SameTebFlags: u16,
    pub TxnScopeEnterCallback: u64,
    pub TxnScopeExitCallback: u64,
    pub TxnScopeContext: u64,
    pub LockCount: u32,
    pub WowTebOffset: i32,
    pub ResourceRetValue: u64,
    pub ReservedForWdf: u64,
    pub ReservedForCrt: u64,
    pub EffectiveContainerId: [u8; 16],
}

struct_layout!(Teb, "TEB", [
    NtTib,
    EnvironmentPointer,
    ClientId,
    ActiveRpcHandle,
    ThreadLocalStoragePointer,
    ProcessEnvironmentBlock,
    LastErrorValue,
    CountOfOwnedCriticalSections,
    CsrClientThread,
    Win32ThreadInfo,
    User32Reserved,
    UserReserved,
    Wow32Reserved,
    CurrentLocale,
    FpSoftwareStatusRegister,
    ReservedForDebuggerInstrumentation,
    SystemReserved1,
    PlaceholderCompatibilityMode,
    PlaceholderHydrationAlwaysExplicit,
    PlaceholderReserved,
    ProxiedProcessId,
    ActivationStack,
    WorkingOnBehalfTicket,
    ExceptionCode,
    ActivationContextStackPointer,
    InstrumentationCallbackSp,
    InstrumentationCallbackPreviousPc,
    InstrumentationCallbackPreviousSp,
    TxFsContext,
    InstrumentationCallbackDisabled,
    UnalignedLoadStoreExceptions,
    GdiTebBatch,
    RealClientId,
    GdiCachedProcessHandle,
    GdiClientPID,
    GdiClientTID,
    GdiThreadLocalInfo,
    Win32ClientInfo,
    glDispatchTable,
    glReserved1,
    glReserved2,
    glSectionInfo,
    glSection,
    glTable,
    glCurrentRC,
    glContext,
    LastStatusValue,
    StaticUnicodeString,
    StaticUnicodeBuffer,
    DeallocationStack,
    TlsSlots,
    TlsLinks,
    Vdm,
    ReservedForNtRpc,
    DbgSsReserved,
    HardErrorMode,
    Instrumentation,
    ActivityId,
    SubProcessTag,
    PerflibData,
    EtwTraceData,
    WinSockData,
    GdiBatchCount,
    CurrentIdealProcessor,
    GuaranteedStackBytes,
    ReservedForPerf,
    ReservedForOle,
    WaitingOnLoaderLock,
    SavedPriorityState,
    ReservedForCodeCoverage,
    ThreadPoolData,
    TlsExpansionSlots,
    DeallocationBStore,
    BStoreLimit,
    MuiGeneration,
    IsImpersonating,
    NlsCache,
    pShimData,
    HeapData,
    CurrentTransactionHandle,
    ActiveFrame,
    FlsData,
    PreferredLanguages,
    UserPrefLanguages,
    MergedPrefLanguages,
    MuiImpersonation,
    CrossTebFlags,
    SameTebFlags,
    TxnScopeEnterCallback,
    TxnScopeExitCallback,
    TxnScopeContext,
    LockCount,
    WowTebOffset,
    ResourceRetValue,
    ReservedForWdf,
    ReservedForCrt,
    EffectiveContainerId,
]);

/// Process Environment Block, 64-bit layout (0x7C8 bytes).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct Peb {
    pub InheritedAddressSpace: u8,
    pub ReadImageFileExecOptions: u8,
    pub BeingDebugged: u8,
    pub BitField: u8,
    pub Padding0: [u8; 4],
    pub Mutant: u64,
    pub ImageBaseAddress: u64,
    pub Ldr: u64,
    pub ProcessParameters: u64,
    pub SubSystemData: u64,
    pub ProcessHeap: u64,
    pub FastPebLock: u64,
    pub AtlThunkSListPtr: u64,
    pub IFEOKey: u64,
    pub CrossProcessFlags: u32,
    pub Padding1: [u8; 4],
    pub KernelCallbackTable: u64,
    pub SystemReserved: u32,
    pub AtlThunkSListPtr32: u32,
    pub ApiSetMap: u64,
    pub TlsExpansionCounter: u32,
    pub Padding2: [u8; 4],
    pub TlsBitmap: u64,
    pub TlsBitmapBits: [u32; 2],
    pub ReadOnlySharedMemoryBase: u64,
    pub SharedData: u64,
    pub ReadOnlyStaticServerData: u64,
    pub AnsiCodePageData: u64,
    pub OemCodePageData: u64,
    pub UnicodeCaseTableData: u64,
    pub NumberOfProcessors: u32,
    pub NtGlobalFlag: u32,
    pub CriticalSectionTimeout: i64,
    pub HeapSegmentReserve: u64,
    pub HeapSegmentCommit: u64,
    pub HeapDeCommitTotalFreeThreshold: u64,
    pub HeapDeCommitFreeBlockThreshold: u64,
    pub NumberOfHeaps: u32,
    pub MaximumNumberOfHeaps: u32,
    pub ProcessHeaps: u64,
    pub GdiSharedHandleTable: u64,
    pub ProcessStarterHelper: u64,
    pub GdiDCAttributeList: u32,
    pub Padding3: [u8; 4],
    pub LoaderLock: u64,
    pub OSMajorVersion: u32,
    pub OSMinorVersion: u32,
    pub OSBuildNumber: u16,
    pub OSCSDVersion: u16,
    pub OSPlatformId: u32,
    pub ImageSubsystem: u32,
    pub ImageSubsystemMajorVersion: u32,
    pub ImageSubsystemMinorVersion: u32,
    pub Padding4: [u8; 4],
    pub ActiveProcessAffinityMask: u64,
    pub GdiHandleBuffer: [u32; 60],
    pub PostProcessInitRoutine: u64,
    pub TlsExpansionBitmap: u64,
    pub TlsExpansionBitmapBits: [u32; 32],
    pub SessionId: u32,
    pub Padding5: [u8; 4],
    pub AppCompatFlags: u64,
    pub AppCompatFlagsUser: u64,
    pub pShimData: u64,
    pub AppCompatInfo: u64,
    pub CSDVersion: UnicodeString,
    pub ActivationContextData: u64,
    pub ProcessAssemblyStorageMap: u64,
    pub SystemDefaultActivationContextData: u64,
    pub SystemAssemblyStorageMap: u64,
    pub MinimumStackCommit: u64,
    pub FlsCallback: u64,
    pub FlsListHead: [u64; 2],
    pub FlsBitmap: u64,
    pub FlsBitmapBits: [u32; 4],
    pub FlsHighIndex: u32,
    pub Padding6: [u8; 4],
    pub WerRegistrationData: u64,
    pub WerShipAssertPtr: u64,
    pub pUnused: u64,
    pub pImageHeaderHash: u64,
    pub TracingFlags: u32,
    pub Padding7: [u8; 4],
    pub CsrServerReadOnlySharedMemoryBase: u64,
    pub TppWorkerpListLock: u64,
    pub TppWorkerpList: [u64; 2],
    pub WaitOnAddressHashTable: [u64; 128],
    pub TelemetryCoverageHeader: u64,
    pub CloudFileFlags: u32,
    pub CloudFileDiagFlags: u32,
    pub PlaceholderCompatibilityMode: u8,
    pub PlaceholderCompatibilityModeReserved: [u8; 7],
    pub LeapSecondData: u64,
    pub LeapSecondFlags: u32,
    pub NtGlobalFlag2: u32,
}

struct_layout!(Peb, "PEB", [
    InheritedAddressSpace,
    ReadImageFileExecOptions,
    BeingDebugged,
    BitField,
    Mutant,
    ImageBaseAddress,
    Ldr,
    ProcessParameters,
    SubSystemData,
    ProcessHeap,
    FastPebLock,
    AtlThunkSListPtr,
    IFEOKey,
    CrossProcessFlags,
    KernelCallbackTable,
    SystemReserved,
    AtlThunkSListPtr32,
    ApiSetMap,
    TlsExpansionCounter,
    TlsBitmap,
    TlsBitmapBits,
    ReadOnlySharedMemoryBase,
    SharedData,
    ReadOnlyStaticServerData,
    AnsiCodePageData,
    OemCodePageData,
    UnicodeCaseTableData,
    NumberOfProcessors,
    NtGlobalFlag,
    CriticalSectionTimeout,
    HeapSegmentReserve,
    HeapSegmentCommit,
    HeapDeCommitTotalFreeThreshold,
    HeapDeCommitFreeBlockThreshold,
    NumberOfHeaps,
    MaximumNumberOfHeaps,
    ProcessHeaps,
    GdiSharedHandleTable,
    ProcessStarterHelper,
    GdiDCAttributeList,
    LoaderLock,
    OSMajorVersion,
    OSMinorVersion,
    OSBuildNumber,
    OSCSDVersion,
    OSPlatformId,
    ImageSubsystem,
    ImageSubsystemMajorVersion,
    ImageSubsystemMinorVersion,
    ActiveProcessAffinityMask,
    GdiHandleBuffer,
    PostProcessInitRoutine,
    TlsExpansionBitmap,
    TlsExpansionBitmapBits,
    SessionId,
    AppCompatFlags,
    AppCompatFlagsUser,
    pShimData,
    AppCompatInfo,
    CSDVersion,
    ActivationContextData,
    ProcessAssemblyStorageMap,
    SystemDefaultActivationContextData,
    SystemAssemblyStorageMap,
    MinimumStackCommit,
    FlsCallback,
    FlsListHead,
    FlsBitmap,
    FlsBitmapBits,
    FlsHighIndex,
    WerRegistrationData,
    WerShipAssertPtr,
    pUnused,
    pImageHeaderHash,
    TracingFlags,
    CsrServerReadOnlySharedMemoryBase,
    TppWorkerpListLock,
    TppWorkerpList,
    WaitOnAddressHashTable,
    TelemetryCoverageHeader,
    CloudFileFlags,
    CloudFileDiagFlags,
    PlaceholderCompatibilityMode,
    PlaceholderCompatibilityModeReserved,
    LeapSecondData,
    LeapSecondFlags,
    NtGlobalFlag2,
]);

/// `CURDIR`: a directory path plus an open handle to it.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct Curdir {
    pub DosPath: UnicodeString,
    pub Handle: u64,
}

/// `RTL_DRIVE_LETTER_CURDIR`: per-drive current directory.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct RtlDriveLetterCurdir {
    pub Flags: u16,
    pub Length: u16,
    pub TimeStamp: u32,
    pub DosPath: AnsiString,
}

/// `RTL_USER_PROCESS_PARAMETERS`, 64-bit layout (0x410 bytes).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct RtlUserProcessParameters {
    pub MaximumLength: u32,
    pub Length: u32,
    pub Flags: u32,
    pub DebugFlags: u32,
    pub ConsoleHandle: u64,
    pub ConsoleFlags: u32,
    pub Padding0: [u8; 4],
    pub StandardInput: u64,
    pub StandardOutput: u64,
    pub StandardError: u64,
    pub CurrentDirectory: Curdir,
    pub DllPath: UnicodeString,
    pub ImagePathName: UnicodeString,
    pub CommandLine: UnicodeString,
    pub Environment: u64,
    pub StartingX: u32,
    pub StartingY: u32,
    pub CountX: u32,
    pub CountY: u32,
    pub CountCharsX: u32,
    pub CountCharsY: u32,
    pub FillAttribute: u32,
    pub WindowFlags: u32,
    pub ShowWindowFlags: u32,
    pub Padding1: [u8; 4],
    pub WindowTitle: UnicodeString,
    pub DesktopInfo: UnicodeString,
    pub ShellInfo: UnicodeString,
    pub RuntimeData: UnicodeString,
    pub CurrentDirectores: [RtlDriveLetterCurdir; 32],
    pub EnvironmentSize: u64,
    pub EnvironmentVersion: u64,
    pub PackageDependencyData: u64,
    pub ProcessGroupId: u32,
    pub LoaderThreads: u32,
}

struct_layout!(RtlUserProcessParameters, "RTL_USER_PROCESS_PARAMETERS", [
    MaximumLength,
    Length,
    Flags,
    DebugFlags,
    ConsoleHandle,
    ConsoleFlags,
    StandardInput,
    StandardOutput,
    StandardError,
    CurrentDirectory,
    DllPath,
    ImagePathName,
    CommandLine,
    Environment,
    StartingX,
    StartingY,
    CountX,
    CountY,
    CountCharsX,
    CountCharsY,
    FillAttribute,
    WindowFlags,
    ShowWindowFlags,
    WindowTitle,
    DesktopInfo,
    ShellInfo,
    RuntimeData,
    CurrentDirectores,
    EnvironmentSize,
    EnvironmentVersion,
    PackageDependencyData,
    ProcessGroupId,
    LoaderThreads,
]);

/// `KSYSTEM_TIME`: a 64-bit time value readable without locks from user mode.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable)]
pub struct KSystemTime {
    pub LowPart: u32,
    pub High1Time: i32,
    pub High2Time: i32,
}

/// `KUSER_SHARED_DATA`, 64-bit layout (0x738 bytes).
///
/// Lives at the fixed guest address `0x7FFE_0000`. The tail of the real
/// structure (XState configuration) is carried as opaque bytes.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct KuserSharedData {
    pub TickCountLowDeprecated: u32,
    pub TickCountMultiplier: u32,
    pub InterruptTime: KSystemTime,
    pub SystemTime: KSystemTime,
    pub TimeZoneBias: KSystemTime,
    pub ImageNumberLow: u16,
    pub ImageNumberHigh: u16,
    pub NtSystemRoot: [u16; 260],
    pub MaxStackTraceDepth: u32,
    pub CryptoExponent: u32,
    pub TimeZoneId: u32,
    pub LargePageMinimum: u32,
    pub AitSamplingValue: u32,
    pub AppCompatFlag: u32,
    pub RNGSeedVersion: u64,
    pub GlobalValidationRunlevel: u32,
    pub TimeZoneBiasStamp: i32,
    pub NtBuildNumber: u32,
    pub NtProductType: u32,
    pub ProductTypeIsValid: u8,
    pub Reserved0: [u8; 1],
    pub NativeProcessorArchitecture: u16,
    pub NtMajorVersion: u32,
    pub NtMinorVersion: u32,
    pub ProcessorFeatures: [u8; 64],
    pub Reserved1: u32,
    pub Reserved3: u32,
    pub TimeSlip: u32,
    pub AlternativeArchitecture: u32,
    pub BootId: u32,
    pub SystemExpirationDate: i64,
    pub SuiteMask: u32,
    pub KdDebuggerEnabled: u8,
    pub MitigationPolicies: u8,
    pub CyclesPerYield: u16,
    pub ActiveConsoleId: u32,
    pub DismountCount: u32,
    pub ComPlusPackage: u32,
    pub LastSystemRITEventTickCount: u32,
    pub NumberOfPhysicalPages: u32,
    pub SafeBootMode: u8,
    pub VirtualizationFlags: u8,
    pub Reserved12: [u8; 2],
    pub SharedDataFlags: u32,
    pub DataFlagsPad: [u32; 1],
    pub TestRetInstruction: u64,
    pub QpcFrequency: i64,
    pub SystemCall: u32,
    pub UserCetAvailableEnvironments: u32,
    pub SystemCallPad: [u64; 2],
    pub TickCount: KSystemTime,
    pub TickCountPad: [u32; 1],
    pub Cookie: u32,
    pub CookiePad: [u32; 1],
    pub ConsoleSessionForegroundProcessId: i64,
    pub TimeUpdateLock: u64,
    pub BaselineSystemTimeQpc: u64,
    pub BaselineInterruptTimeQpc: u64,
    pub QpcSystemTimeIncrement: u64,
    pub QpcInterruptTimeIncrement: u64,
    pub QpcSystemTimeIncrementShift: u8,
    pub QpcInterruptTimeIncrementShift: u8,
    pub UnparkedProcessorCount: u16,
    pub EnclaveFeatureMask: [u32; 4],
    pub TelemetryCoverageRound: u32,
    pub UserModeGlobalLogger: [u16; 16],
    pub ImageFileExecutionOptions: u32,
    pub LangGenerationCount: u32,
    pub Reserved4: u64,
    pub InterruptTimeBias: u64,
    pub QpcBias: u64,
    pub ActiveProcessorCount: u32,
    pub ActiveGroupCount: u8,
    pub Reserved9: u8,
    pub QpcData: u16,
    pub TimeZoneBiasEffectiveStart: i64,
    pub TimeZoneBiasEffectiveEnd: i64,
    pub XState: [u8; 0x360],
}

struct_layout!(KuserSharedData, "KUSER_SHARED_DATA", [
    TickCountLowDeprecated,
    TickCountMultiplier,
    InterruptTime,
    SystemTime,
    TimeZoneBias,
    ImageNumberLow,
    ImageNumberHigh,
    NtSystemRoot,
    MaxStackTraceDepth,
    CryptoExponent,
    TimeZoneId,
    LargePageMinimum,
    AitSamplingValue,
    AppCompatFlag,
    RNGSeedVersion,
    GlobalValidationRunlevel,
    TimeZoneBiasStamp,
    NtBuildNumber,
    NtProductType,
    ProductTypeIsValid,
    Reserved0,
    NativeProcessorArchitecture,
    NtMajorVersion,
    NtMinorVersion,
    ProcessorFeatures,
    Reserved1,
    Reserved3,
    TimeSlip,
    AlternativeArchitecture,
    BootId,
    SystemExpirationDate,
    SuiteMask,
    KdDebuggerEnabled,
    MitigationPolicies,
    CyclesPerYield,
    ActiveConsoleId,
    DismountCount,
    ComPlusPackage,
    LastSystemRITEventTickCount,
    NumberOfPhysicalPages,
    SafeBootMode,
    VirtualizationFlags,
    Reserved12,
    SharedDataFlags,
    DataFlagsPad,
    TestRetInstruction,
    QpcFrequency,
    SystemCall,
    UserCetAvailableEnvironments,
    SystemCallPad,
    TickCount,
    TickCountPad,
    Cookie,
    CookiePad,
    ConsoleSessionForegroundProcessId,
    TimeUpdateLock,
    BaselineSystemTimeQpc,
    BaselineInterruptTimeQpc,
    QpcSystemTimeIncrement,
    QpcInterruptTimeIncrement,
    QpcSystemTimeIncrementShift,
    QpcInterruptTimeIncrementShift,
    UnparkedProcessorCount,
    EnclaveFeatureMask,
    TelemetryCoverageRound,
    UserModeGlobalLogger,
    ImageFileExecutionOptions,
    LangGenerationCount,
    Reserved4,
    InterruptTimeBias,
    QpcBias,
    ActiveProcessorCount,
    ActiveGroupCount,
    Reserved9,
    QpcData,
    TimeZoneBiasEffectiveStart,
    TimeZoneBiasEffectiveEnd,
    XState,
]);

/// x86-64 `CONTEXT` (0x4D0 bytes, 16-byte aligned).
///
/// The floating-point save area and the vector registers are carried as
/// opaque bytes; the emulated loader only needs the record's size, alignment
/// and the integer-register slots.
#[repr(C, align(16))]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub struct ThreadContext {
    pub P1Home: u64,
    pub P2Home: u64,
    pub P3Home: u64,
    pub P4Home: u64,
    pub P5Home: u64,
    pub P6Home: u64,
    pub ContextFlags: u32,
    pub MxCsr: u32,
    pub SegCs: u16,
    pub SegDs: u16,
    pub SegEs: u16,
    pub SegFs: u16,
    pub SegGs: u16,
    pub SegSs: u16,
    pub EFlags: u32,
    pub Dr0: u64,
    pub Dr1: u64,
    pub Dr2: u64,
    pub Dr3: u64,
    pub Dr6: u64,
    pub Dr7: u64,
    pub Rax: u64,
    pub Rcx: u64,
    pub Rdx: u64,
    pub Rbx: u64,
    pub Rsp: u64,
    pub Rbp: u64,
    pub Rsi: u64,
    pub Rdi: u64,
    pub R8: u64,
    pub R9: u64,
    pub R10: u64,
    pub R11: u64,
    pub R12: u64,
    pub R13: u64,
    pub R14: u64,
    pub R15: u64,
    pub Rip: u64,
    pub FltSave: [u8; 512],
    pub VectorRegister: [u8; 416],
    pub VectorControl: u64,
    pub DebugControl: u64,
    pub LastBranchToRip: u64,
    pub LastBranchFromRip: u64,
    pub LastExceptionToRip: u64,
    pub LastExceptionFromRip: u64,
}

// Layout pins. A mismatch here is a build error, not a runtime surprise.
const _: () = {
    use core::mem::{offset_of, size_of};

    assert!(size_of::<UnicodeString>() == 0x10);
    assert!(offset_of!(UnicodeString, Buffer) == 0x8);

    assert!(size_of::<NtTib>() == 0x38);
    assert!(offset_of!(NtTib, Self_) == 0x30);

    assert!(size_of::<Teb>() == 0x1838);
    assert!(offset_of!(Teb, ClientId) == 0x40);
    assert!(offset_of!(Teb, ProcessEnvironmentBlock) == 0x60);
    assert!(offset_of!(Teb, LastErrorValue) == 0x68);
    assert!(offset_of!(Teb, GdiTebBatch) == 0x2F0);
    assert!(offset_of!(Teb, StaticUnicodeString) == 0x1258);
    assert!(offset_of!(Teb, DeallocationStack) == 0x1478);
    assert!(offset_of!(Teb, TlsSlots) == 0x1480);
    assert!(offset_of!(Teb, GuaranteedStackBytes) == 0x1748);

    assert!(size_of::<Peb>() == 0x7C8);
    assert!(offset_of!(Peb, ImageBaseAddress) == 0x10);
    assert!(offset_of!(Peb, Ldr) == 0x18);
    assert!(offset_of!(Peb, ProcessParameters) == 0x20);
    assert!(offset_of!(Peb, ProcessHeap) == 0x30);
    assert!(offset_of!(Peb, NumberOfProcessors) == 0xB8);
    assert!(offset_of!(Peb, ProcessHeaps) == 0xF0);
    assert!(offset_of!(Peb, GdiHandleBuffer) == 0x140);
    assert!(offset_of!(Peb, SessionId) == 0x2C0);
    assert!(offset_of!(Peb, WaitOnAddressHashTable) == 0x3A0);

    assert!(size_of::<RtlUserProcessParameters>() == 0x410);
    assert!(offset_of!(RtlUserProcessParameters, Flags) == 0x08);
    assert!(offset_of!(RtlUserProcessParameters, CurrentDirectory) == 0x38);
    assert!(offset_of!(RtlUserProcessParameters, ImagePathName) == 0x60);
    assert!(offset_of!(RtlUserProcessParameters, CommandLine) == 0x70);
    assert!(offset_of!(RtlUserProcessParameters, CurrentDirectores) == 0xF0);

    assert!(size_of::<KuserSharedData>() == 0x738);
    assert!(offset_of!(KuserSharedData, ImageNumberLow) == 0x2C);
    assert!(offset_of!(KuserSharedData, NtSystemRoot) == 0x30);
    assert!(offset_of!(KuserSharedData, NtBuildNumber) == 0x260);
    assert!(offset_of!(KuserSharedData, NtMajorVersion) == 0x26C);
    assert!(offset_of!(KuserSharedData, ProcessorFeatures) == 0x274);
    assert!(offset_of!(KuserSharedData, QpcFrequency) == 0x300);
    assert!(offset_of!(KuserSharedData, TickCount) == 0x320);
    assert!(offset_of!(KuserSharedData, Cookie) == 0x330);
    assert!(offset_of!(KuserSharedData, XState) == 0x3D8);

    assert!(size_of::<ThreadContext>() == 0x4D0);
    assert!(core::mem::align_of::<ThreadContext>() == 16);
    assert!(offset_of!(ThreadContext, ContextFlags) == 0x30);
    assert!(offset_of!(ThreadContext, Rax) == 0x78);
    assert!(offset_of!(ThreadContext, Rip) == 0xF8);
    assert!(offset_of!(ThreadContext, FltSave) == 0x100);
};
