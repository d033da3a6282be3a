// Where a real vendor CCD driver would plug in: a second
// `AbstractDetector` implementation, constructed the same way
// `EmulatedDetector` is and handed to `DetectorCache::initialize` in
// place of it. No such adapter is built here — the vendor SDK isn't
// available in this environment — but the trait boundary in
// `mookodi_elements::detector_trait` is exactly where one would live,
// and `mookodi_camera_server`'s `--emulate_camera` flag is where the
// choice between the two would be made at startup.
